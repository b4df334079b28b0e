//! Command-line surface: status, pulse, and add-intent, mirroring the
//! original operator tool's console output.

use crate::coordinator::{Coordinator, PulseReport};
use crate::intents::AutonomyMode;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "coordinatorctl", about = "Inspect and drive the Station Calyx coordinator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print current coordinator status
    Status,
    /// Run one coordinator pulse
    Pulse,
    /// Add a new intent to the queue
    AddIntent {
        description: String,
        #[arg(long, default_value = "CBO")]
        origin: String,
        #[arg(long = "capabilities", value_delimiter = ',')]
        required_capabilities: Vec<String>,
        #[arg(long, default_value = "")]
        outcome: String,
        #[arg(long, default_value_t = 50)]
        priority: i64,
        #[arg(long, default_value = "suggest")]
        autonomy: String,
    },
}

fn parse_autonomy(raw: &str) -> AutonomyMode {
    match raw {
        "guide" => AutonomyMode::Guide,
        "execute" => AutonomyMode::Execute,
        _ => AutonomyMode::Suggest,
    }
}

pub async fn run(cli: Cli, coordinator: &Coordinator) -> anyhow::Result<()> {
    match cli.command {
        Command::Status => {
            let status = coordinator.get_status().await;
            println!("[COORDINATOR STATUS]");
            println!("{}", "=".repeat(60));
            println!("Autonomy mode: {}", status.autonomy_mode.as_str());
            println!("Intents queued: {}", status.intents_count);
            println!("Confidence by capability:");
            for (capability, confidence) in &status.confidence {
                println!("  {capability}: {confidence:.2}");
            }
            println!("{}", "=".repeat(60));
        }
        Command::Pulse => {
            let report = coordinator.pulse().await;
            print_pulse_report(&report);
        }
        Command::AddIntent {
            description,
            origin,
            required_capabilities,
            outcome,
            priority,
            autonomy,
        } => {
            let intent_id = coordinator
                .add_intent(
                    description,
                    origin,
                    required_capabilities,
                    outcome,
                    priority,
                    parse_autonomy(&autonomy),
                )
                .await;
            match intent_id {
                Some(id) => println!("Intent added: {id}"),
                None => println!("Intent rejected (duplicate or unclarified artifact)"),
            }
        }
    }
    Ok(())
}

fn print_pulse_report(report: &PulseReport) {
    println!("[COORDINATOR PULSE]");
    println!("{}", "=".repeat(60));
    println!("Events ingested: {}", report.events_ingested);
    println!("Guardrails ok: {}", report.guardrails.ok);
    for violation in &report.guardrails.violations {
        println!("  violation: {violation}");
    }
    println!("Intents expired: {}", report.intents_expired);
    println!("Intents queued: {}", report.intents_queued);
    println!("Autonomy mode: {}", report.autonomy_mode.as_str());
    println!("Executions:");
    for execution in &report.executions {
        println!(
            "  intent={} status={}",
            execution.intent_id,
            execution.result.status_str()
        );
    }
    if !report.stalls.is_empty() {
        println!("Stalls:");
        for stall in &report.stalls {
            println!("  {stall}");
        }
    }
    println!("Active escalations: {}", report.active_escalations);
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_command_parses() {
        let cli = Cli::try_parse_from(["coordinatorctl", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn pulse_command_parses() {
        let cli = Cli::try_parse_from(["coordinatorctl", "pulse"]).unwrap();
        assert!(matches!(cli.command, Command::Pulse));
    }

    #[test]
    fn add_intent_parses_capability_list() {
        let cli = Cli::try_parse_from([
            "coordinatorctl",
            "add-intent",
            "rotate logs",
            "--capabilities",
            "log_rotation,metrics_summary",
            "--priority",
            "80",
            "--autonomy",
            "execute",
        ])
        .unwrap();

        match cli.command {
            Command::AddIntent {
                description,
                required_capabilities,
                priority,
                autonomy,
                ..
            } => {
                assert_eq!(description, "rotate logs");
                assert_eq!(required_capabilities, vec!["log_rotation", "metrics_summary"]);
                assert_eq!(priority, 80);
                assert_eq!(autonomy, "execute");
            }
            other => panic!("expected AddIntent, got {other:?}"),
        }
    }

    #[test]
    fn unknown_autonomy_string_defaults_to_suggest() {
        assert_eq!(parse_autonomy("bogus"), AutonomyMode::Suggest);
        assert_eq!(parse_autonomy("guide"), AutonomyMode::Guide);
        assert_eq!(parse_autonomy("execute"), AutonomyMode::Execute);
    }
}
