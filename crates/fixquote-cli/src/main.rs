use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fixquote_contracts::chat::{parse_command, ChatCommand, CHAT_HELP_LINES};
use fixquote_contracts::device::DeviceClass;
use fixquote_contracts::dialogue::{AssistantSession, DialoguePhase};
use fixquote_contracts::error::AssistantError;
use fixquote_contracts::events::{EventPayload, SessionLog};
use fixquote_contracts::outcome::EstimateResult;
use fixquote_engine::{
    prepare_batch, read_image_source, submit_turn, AnalysisBackend, BookingClient, FallbackTable,
    LookupMode, OrderLookup, WorkOrderClient,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "fixquote", version, about = "Fixquote estimate assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Analyze(AnalyzeArgs),
    Order(OrderArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Session output directory (events and receipts land here).
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "desktop")]
    device: String,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    service: Option<String>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    description: String,
    /// Repeatable; bounded by the device-class image limit.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long, default_value = "desktop")]
    device: String,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    service: Option<String>,
}

#[derive(Debug, Parser)]
struct OrderArgs {
    /// Work-order number or client name, depending on mode.
    #[arg(long)]
    query: String,
    #[arg(long, default_value = "by_number")]
    mode: String,
    /// Client name for the verify cross-check.
    #[arg(long)]
    name: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("fixquote error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze(args),
        Command::Order(args) => run_order(args),
    }
}

fn parse_device(value: &str) -> Result<DeviceClass> {
    match DeviceClass::parse(value) {
        Some(device) => Ok(device),
        None => bail!("unknown device class '{value}' (expected mobile or desktop)"),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let device = parse_device(&args.device)?;
    let session_id = format!("sess-{}", Uuid::new_v4());
    let log = SessionLog::new(args.out.join("events.jsonl"), &session_id, device);
    let backend = AnalysisBackend::from_env();
    let bookings = BookingClient::from_env();
    let fallbacks = FallbackTable::bundled()?;

    let mut session = AssistantSession::new(device);
    session.set_location(args.location);
    session.set_service_context(args.service);

    println!("Fixquote assistant started ({session_id}). Type /help for commands.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_command(line.trim_end_matches(['\n', '\r'])) {
            ChatCommand::Noop => continue,
            ChatCommand::Help => {
                for help_line in CHAT_HELP_LINES {
                    println!("{help_line}");
                }
            }
            ChatCommand::Attach { paths } => attach_images(&mut session, &paths, &log),
            ChatCommand::Remove { index } => match session.remove_image(index) {
                Ok(Some(image)) => println!("Removed {}", image.label),
                Ok(None) => println!("No photo at position {}", index + 1),
                Err(error) => println!("{}", error.user_message()),
            },
            ChatCommand::ListImages => list_images(&session),
            ChatCommand::Location { text } => {
                session.set_location(Some(text.clone()));
                println!("Location set to {text}");
            }
            ChatCommand::Service { tag } => {
                session.set_service_context(Some(tag.clone()));
                println!("Service context set to {tag}");
            }
            ChatCommand::Device { class } => {
                if class.is_empty() {
                    println!("Device class: {}", session.device().wire_name());
                } else {
                    println!(
                        "Device class is fixed per session; restart with --device {class} to switch."
                    );
                }
            }
            ChatCommand::Book { name, phone } => {
                book_current_estimate(&session, &bookings, &name, &phone)
            }
            ChatCommand::Reset => {
                session.reset();
                log.emit("reset", EventPayload::new())?;
                println!("Started over. Attach photos and describe the problem.");
            }
            ChatCommand::Quit => break,
            ChatCommand::Say { text } => {
                match submit_turn(&mut session, &text, &backend, &fallbacks, &log, &args.out) {
                    Ok(_) => report_phase(&session),
                    Err(err) => match err.downcast_ref::<AssistantError>() {
                        Some(error) => println!("{}", error.user_message()),
                        None => return Err(err),
                    },
                }
            }
            ChatCommand::Unknown { command, arg: _ } => {
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }
    Ok(())
}

fn attach_images(session: &mut AssistantSession, paths: &[String], log: &SessionLog) {
    if paths.is_empty() {
        println!("/attach requires at least one path");
        return;
    }
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        match read_image_source(Path::new(path)) {
            Ok(source) => sources.push(source),
            Err(err) => {
                println!("Could not read {path}: {err:#}");
                return;
            }
        }
    }
    let captured = match prepare_batch(&sources, session.options()) {
        Ok(captured) => captured,
        Err(error) => {
            println!("{}", error.user_message());
            return;
        }
    };

    let summary: Vec<String> = captured
        .iter()
        .map(|image| {
            format!(
                "{} ({}x{}, {} KB, {} pass{})",
                image.label,
                image.encoded.width,
                image.encoded.height,
                image.encoded.base64_jpeg.len() * 3 / 4 / 1024,
                image.encoded.passes,
                if image.encoded.passes == 1 { "" } else { "es" }
            )
        })
        .collect();

    match session.add_images(captured) {
        Ok(()) => {
            for line in &summary {
                println!("Attached {line}");
            }
            let mut payload = EventPayload::new();
            payload.insert("count".to_string(), json!(summary.len()));
            payload.insert("batch_len".to_string(), json!(session.batch().len()));
            let _ = log.emit("image_added", payload);
        }
        Err(error) => {
            println!("{}", error.user_message());
            let mut payload = EventPayload::new();
            payload.insert("rejected".to_string(), json!(summary.len()));
            let _ = log.emit("image_rejected", payload);
        }
    }
}

fn list_images(session: &AssistantSession) {
    if session.batch().is_empty() {
        println!("No photos attached.");
        return;
    }
    for (index, image) in session.batch().images().iter().enumerate() {
        println!(
            "{}. {} ({}x{}, quality {})",
            index + 1,
            image.label,
            image.encoded.width,
            image.encoded.height,
            image.encoded.quality
        );
    }
}

fn report_phase(session: &AssistantSession) {
    match session.phase() {
        DialoguePhase::Result => {
            if let Some(result) = session.result() {
                print_estimate(result);
                println!("Use /book \"Your Name\" <phone> to request a visit.");
            }
        }
        DialoguePhase::Clarifying => {
            println!("A few more details are needed:");
            if let Some(turn) = session.transcript().turns().last() {
                println!("{}", turn.text);
            }
            println!("(answer in plain text; your photos stay attached)");
        }
        DialoguePhase::OffTopic => {
            println!(
                "{}",
                session
                    .off_topic_message()
                    .unwrap_or("This request is outside what we service.")
            );
            println!("Describe a home-maintenance problem to start again.");
        }
        DialoguePhase::Failed => {
            if let Some(message) = session.failure_message() {
                println!("{message}");
            }
            if let Some(result) = session.result() {
                println!("Rough range while we sort that out:");
                print_estimate(result);
            }
        }
        DialoguePhase::Idle | DialoguePhase::Submitting => {}
    }
}

fn print_estimate(result: &EstimateResult) {
    println!("Issue: {}", result.analysis.issue);
    if let Some(detail) = &result.analysis.detail {
        println!("Detail: {detail}");
    }
    if let Some(severity) = &result.analysis.severity {
        println!("Severity: {severity}");
    }
    println!(
        "Estimated cost: {:.0}-{:.0} {}{}",
        result.cost_estimate.min,
        result.cost_estimate.max,
        result.cost_estimate.currency,
        if result.fallback {
            " (rough fallback range)"
        } else {
            ""
        }
    );
}

fn book_current_estimate(
    session: &AssistantSession,
    bookings: &BookingClient,
    name: &str,
    phone: &str,
) {
    let Some(result) = session.result() else {
        println!("Nothing to book yet; get an estimate first.");
        return;
    };
    match bookings.book(result, name, phone, None) {
        Ok(confirmation) => {
            println!("Booking requested, reference {}", confirmation.reference);
            if let Some(message) = confirmation.message {
                println!("{message}");
            }
        }
        Err(err) => println!("Booking failed: {err:#}"),
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let device = parse_device(&args.device)?;
    let session_id = format!("sess-{}", Uuid::new_v4());
    let log = SessionLog::new(args.out.join("events.jsonl"), &session_id, device);
    let backend = AnalysisBackend::from_env();
    let fallbacks = FallbackTable::bundled()?;

    let mut session = AssistantSession::new(device);
    session.set_location(args.location);
    session.set_service_context(args.service);

    let sources = args
        .images
        .iter()
        .map(|path| read_image_source(path))
        .collect::<Result<Vec<_>>>()?;
    let captured = prepare_batch(&sources, session.options()).map_err(anyhow::Error::from)?;
    session.add_images(captured).map_err(anyhow::Error::from)?;

    submit_turn(
        &mut session,
        &args.description,
        &backend,
        &fallbacks,
        &log,
        &args.out,
    )?;
    report_phase(&session);
    Ok(match session.phase() {
        DialoguePhase::Failed => 1,
        _ => 0,
    })
}

fn run_order(args: OrderArgs) -> Result<i32> {
    let Some(mode) = LookupMode::parse(&args.mode) else {
        bail!("unknown lookup mode '{}' (by_number, by_name, verify)", args.mode);
    };
    let client = WorkOrderClient::from_env();
    match client.lookup(&args.query, mode, args.name.as_deref())? {
        OrderLookup::Preview(summary) => {
            println!("Order {}", summary.order_number);
            if let Some(service) = summary.service {
                println!("Service: {service}");
            }
            if let Some(status) = summary.status {
                println!("Status: {status}");
            }
            if let Some(date) = summary.scheduled_date {
                println!("Scheduled: {date}");
            }
            println!("Run with --mode verify --name \"<client name>\" for full details.");
            Ok(0)
        }
        OrderLookup::Candidates(rows) => {
            println!("Multiple matches:");
            for summary in rows {
                println!(
                    "  {} - {}",
                    summary.order_number,
                    summary.client_name.unwrap_or_else(|| "unknown".to_string())
                );
            }
            Ok(0)
        }
        OrderLookup::Verified(details) => {
            println!("Order {} (verified)", details.summary.order_number);
            if let Some(client_name) = details.summary.client_name {
                println!("Client: {client_name}");
            }
            if let Some(service) = details.summary.service {
                println!("Service: {service}");
            }
            if let Some(status) = details.summary.status {
                println!("Status: {status}");
            }
            if let Some(date) = details.summary.scheduled_date {
                println!("Scheduled: {date}");
            }
            if let Some(address) = details.address {
                println!("Address: {address}");
            }
            if let Some(notes) = details.notes {
                println!("Notes: {notes}");
            }
            if let Some(total_due) = details.total_due {
                println!("Total due: {total_due:.2} EUR");
            }
            Ok(0)
        }
        OrderLookup::NotFound { message } => {
            println!("{message}");
            Ok(1)
        }
    }
}
