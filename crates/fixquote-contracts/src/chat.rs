/// Slash-command parsing for the assistant REPL. Anything that is not
/// a command is treated as the problem description (or, while
/// clarifying, the next chat turn).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Noop,
    Help,
    Attach { paths: Vec<String> },
    Remove { index: usize },
    ListImages,
    Location { text: String },
    Service { tag: String },
    Device { class: String },
    Book { name: String, phone: String },
    Reset,
    Quit,
    Say { text: String },
    Unknown { command: String, arg: String },
}

pub const CHAT_HELP_LINES: &[&str] = &[
    "/attach <path>...   attach one or more photos (quotes for spaces)",
    "/remove <n>         drop photo n from the batch",
    "/images             list attached photos",
    "/location <text>    set the job location",
    "/service <tag>      set the service context (plumbing, electrical, ...)",
    "/device             show the device class (fixed per session)",
    "/book <name> <tel>  request a booking for the current estimate",
    "/reset              start over",
    "/quit               leave the assistant",
    "anything else       describe the problem / answer a question",
];

pub fn parse_command(text: &str) -> ChatCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ChatCommand::Noop;
    }

    let Some(tail) = trimmed.strip_prefix('/') else {
        return ChatCommand::Say {
            text: trimmed.to_string(),
        };
    };

    let command_len = tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return ChatCommand::Say {
            text: trimmed.to_string(),
        };
    }
    let command = tail[..command_len].to_ascii_lowercase();
    let arg = tail[command_len..].trim();

    match command.as_str() {
        "help" => ChatCommand::Help,
        "attach" => ChatCommand::Attach {
            paths: split_paths(arg),
        },
        "remove" => match arg.parse::<usize>() {
            // 1-based on the prompt, 0-based internally.
            Ok(index) if index >= 1 => ChatCommand::Remove { index: index - 1 },
            _ => ChatCommand::Unknown {
                command,
                arg: arg.to_string(),
            },
        },
        "images" => ChatCommand::ListImages,
        "location" => ChatCommand::Location {
            text: arg.to_string(),
        },
        "service" => ChatCommand::Service {
            tag: arg.to_ascii_lowercase(),
        },
        "device" => ChatCommand::Device {
            class: arg.to_ascii_lowercase(),
        },
        "book" => parse_book(&command, arg),
        "reset" | "start_over" => ChatCommand::Reset,
        "quit" | "exit" => ChatCommand::Quit,
        _ => ChatCommand::Unknown {
            command,
            arg: arg.to_string(),
        },
    }
}

fn parse_book(command: &str, arg: &str) -> ChatCommand {
    let parts = split_paths(arg);
    if parts.len() < 2 {
        return ChatCommand::Unknown {
            command: command.to_string(),
            arg: arg.to_string(),
        };
    }
    // Last token is the phone number; everything before it is the name.
    let phone = parts[parts.len() - 1].clone();
    let name = parts[..parts.len() - 1].join(" ");
    ChatCommand::Book { name, phone }
}

fn split_paths(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts.into_iter().filter(|value| !value.is_empty()).collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, ChatCommand};

    #[test]
    fn plain_text_is_a_chat_turn() {
        assert_eq!(
            parse_command("  the tap drips  "),
            ChatCommand::Say {
                text: "the tap drips".to_string()
            }
        );
        assert_eq!(parse_command("   "), ChatCommand::Noop);
    }

    #[test]
    fn attach_splits_quoted_paths() {
        assert_eq!(
            parse_command("/attach \"/tmp/kitchen sink.jpg\" wall.jpg"),
            ChatCommand::Attach {
                paths: vec!["/tmp/kitchen sink.jpg".to_string(), "wall.jpg".to_string()]
            }
        );
    }

    #[test]
    fn remove_is_one_based_on_the_prompt() {
        assert_eq!(parse_command("/remove 1"), ChatCommand::Remove { index: 0 });
        assert!(matches!(
            parse_command("/remove 0"),
            ChatCommand::Unknown { .. }
        ));
        assert!(matches!(
            parse_command("/remove first"),
            ChatCommand::Unknown { .. }
        ));
    }

    #[test]
    fn book_takes_name_then_phone() {
        assert_eq!(
            parse_command("/book \"Maria Silva\" +351912345678"),
            ChatCommand::Book {
                name: "Maria Silva".to_string(),
                phone: "+351912345678".to_string()
            }
        );
        assert!(matches!(
            parse_command("/book maria"),
            ChatCommand::Unknown { .. }
        ));
    }

    #[test]
    fn service_and_device_are_lowercased() {
        assert_eq!(
            parse_command("/service Plumbing"),
            ChatCommand::Service {
                tag: "plumbing".to_string()
            }
        );
        assert_eq!(
            parse_command("/device MOBILE"),
            ChatCommand::Device {
                class: "mobile".to_string()
            }
        );
        // Bare /device queries the session's class.
        assert_eq!(
            parse_command("/device"),
            ChatCommand::Device {
                class: String::new()
            }
        );
    }

    #[test]
    fn unknown_command_echoes_itself() {
        assert_eq!(
            parse_command("/frobnicate now"),
            ChatCommand::Unknown {
                command: "frobnicate".to_string(),
                arg: "now".to_string()
            }
        );
    }
}
