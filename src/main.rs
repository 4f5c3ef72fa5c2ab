use clap::{Parser, Subcommand};
use dotenv::dotenv;
use pipewright::pipeline::builder::Builder;
use pipewright::pipeline::render;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a pipeline definition as a workflow document
    Render {
        /// Path to the pipeline definition
        #[arg(short, long)]
        file: String,
    },
    /// Resolve a pipeline definition and print each job's steps
    Check {
        /// Path to the pipeline definition
        #[arg(short, long)]
        file: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Render { file } => {
            let workflow = Builder::build_file(&file)?;
            log::info!("Rendering {} jobs from {}", workflow.jobs().len(), file);
            print!("{}", render::to_yaml_string(&workflow)?);
        }
        Commands::Check { file } => {
            let workflow = Builder::build_file(&file)?;
            let resolved = workflow.resolve()?;

            for job in &resolved.jobs {
                if job.needs.is_empty() {
                    println!("{}", job.id);
                } else {
                    println!("{} (needs: {})", job.id, job.needs.join(", "));
                }
                for (i, step) in job.steps.iter().enumerate() {
                    match &step.condition {
                        Some(condition) => {
                            println!("  {}. {}  [if: {}]", i + 1, step.step.label(), condition)
                        }
                        None => println!("  {}. {}", i + 1, step.step.label()),
                    }
                }
            }
            log::info!("Checked {} jobs in {}", resolved.jobs.len(), file);
        }
    }

    Ok(())
}
