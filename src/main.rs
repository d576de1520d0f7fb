use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rebrand::config::RebrandConfig;
use rebrand::generation::{
    build_prompt, BrandGuide, EchoResponsesApi, OpenAiResponsesApi, PromptContext, ResponsesApi,
};
use rebrand::logging::{init_logging, LoggingConfig};
use rebrand::pipeline::{Pipeline, PipelineRequest, TemplateSource};
use rebrand::ports::{FsAssetStore, HttpImageSource};
use rebrand::template::Template;

/// Exit code when at least one image failed.
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "rebrand")]
#[command(version)]
#[command(about = "Regenerate template images to match a brand guide")]
struct Cli {
    /// Suppress all logging except warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    /// Path to a TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the image tasks found in a template
    Plan {
        /// Template element JSON
        #[arg(long, short)]
        template: PathBuf,
    },

    /// Print the generation prompt for one element
    Prompt {
        /// Brand guide, free text or JSON profile
        #[arg(long, short)]
        brand_guide: PathBuf,

        /// Element id, e.g. hero_image or logo
        #[arg(long, short)]
        element_id: String,

        /// Ask for a transparent background
        #[arg(long)]
        transparent: bool,

        /// Description of what the image shows
        #[arg(long)]
        alt_text: Option<String>,
    },

    /// Regenerate every image in a template
    Run {
        /// Brand guide, free text or JSON profile
        #[arg(long, short)]
        brand_guide: PathBuf,

        /// Template element JSON
        #[arg(long, short)]
        template: PathBuf,

        /// Directory the regenerated images are written to
        #[arg(long, short, default_value = "rebranded")]
        out: PathBuf,

        /// Identifier reported in the output
        #[arg(long)]
        template_id: Option<String>,

        /// Return each source image unchanged instead of calling the API
        #[arg(long)]
        offline: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_flags(cli.verbose, cli.quiet));

    let config = RebrandConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Plan { template } => {
            let template = Template::parse(&read(&template)?)?;
            let tasks: Vec<_> = template
                .image_tasks()
                .into_iter()
                .map(|task| {
                    let size = task.size();
                    json!({ "task": task, "size": size })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        Commands::Prompt {
            brand_guide,
            element_id,
            transparent,
            alt_text,
        } => {
            let guide = BrandGuide::from_contents(&read(&brand_guide)?);
            let prompt = build_prompt(
                &config.generation.brand_name,
                &guide.profile(),
                PromptContext {
                    element_id: &element_id,
                    transparent_background: transparent,
                    alt_text: alt_text.as_deref(),
                },
            );
            println!("{}", prompt);
        }
        Commands::Run {
            brand_guide,
            template,
            out,
            template_id,
            offline,
        } => {
            return run(&config, &brand_guide, &template, out, template_id, offline).await;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(
    config: &RebrandConfig,
    brand_guide: &Path,
    template: &Path,
    out: PathBuf,
    template_id: Option<String>,
    offline: bool,
) -> anyhow::Result<ExitCode> {
    let brand_guide = BrandGuide::from_contents(&read(brand_guide)?);
    let template_json = read(template)?;
    let template_id = template_id.unwrap_or_else(|| {
        template
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string())
    });

    let api: Arc<dyn ResponsesApi> = if offline {
        Arc::new(EchoResponsesApi::new())
    } else {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            bail!("OPENAI_API_KEY is not set (use --offline to run without the API)");
        };
        Arc::new(OpenAiResponsesApi::new(
            api_key,
            config.generation.api_base_url.clone(),
        )?)
    };
    let images = Arc::new(HttpImageSource::new(config.generation.timeout())?.with_local_files());
    let store = Arc::new(FsAssetStore::new(out));

    let pipeline = Pipeline::from_config(config, api, images, store);
    let output = pipeline
        .run(PipelineRequest {
            template_id,
            brand_guide,
            template: TemplateSource::Json(template_json),
            instructions: None,
        })
        .await?;

    let report = json!({ "batch": output.batch, "cost": output.cost });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if output.batch.failed > 0 {
        return Ok(ExitCode::from(EXIT_PARTIAL_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
