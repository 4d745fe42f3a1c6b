use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use cadence_rs::agents::{EchoAgent, HttpAgent, LogAgent};
use cadence_rs::engine::{
    validator, EngineConfig, ExecutionContext, WorkflowDefinition, WorkflowEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a workflow file for structural errors
    Validate {
        /// Path to the workflow YAML file
        #[arg(short, long)]
        file: String,
    },
    /// Execute a workflow from a file and wait for the result
    Run {
        /// Path to the workflow YAML file
        #[arg(short, long)]
        file: String,

        /// Input JSON passed to the first step
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
}

fn load_definition(
    path: &str,
) -> Result<WorkflowDefinition, Box<dyn std::error::Error + Send + Sync>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { file } => {
            let definition = load_definition(&file)?;
            validator::validate(&definition)?;
            println!(
                "{}: ok ({} steps, priority {:?})",
                definition.id,
                definition.steps.len(),
                definition.priority
            );
        }
        Commands::Run { file, input } => {
            let definition = load_definition(&file)?;
            let input: Value = serde_json::from_str(&input)?;

            let engine = Arc::new(WorkflowEngine::new(EngineConfig::default()));
            engine.register_agent(Arc::new(EchoAgent)).await;
            engine.register_agent(Arc::new(LogAgent)).await;
            engine.register_agent(Arc::new(HttpAgent::new())).await;

            let workflow_id = definition.id.clone();
            engine.register_workflow(definition).await?;

            let mut events = engine.subscribe().await;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    log::info!("{}", event.name());
                }
            });

            engine.clone().start().await?;
            let execution_id = engine
                .execute_workflow(&workflow_id, input, ExecutionContext::default())
                .await?;
            println!("Execution {} queued", execution_id);

            loop {
                let execution = engine.get_execution(&execution_id).await?;
                if execution.status.is_terminal() {
                    println!("Status: {:?}", execution.status);
                    if let Some(output) = &execution.output {
                        println!("Output: {}", serde_json::to_string_pretty(output)?);
                    }
                    if let Some(error) = &execution.error {
                        println!("Error: {}", error);
                    }
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            engine.stop().await?;
        }
    }

    Ok(())
}
