use anyhow::Context;
use clap::{Parser, Subcommand};
use lead_form::automount::{ScriptDataset, mount_page};
use lead_form::config::AppConfig;
use lead_form::ip_lookup::{HttpIpLookup, IpLookup, StaticIpLookup};
use lead_form::labels::LabelCatalog;
use lead_form::registry::{ElementRegistry, register_lead_form};
use lead_form::server::{self, AppState};
use lead_form::submission::HttpLeadSink;
use lead_form::{PageContext, WidgetServices};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lead-form", version, about = "Lead capture form widget server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the loader script, widget fragments and submit endpoint.
    Serve {
        /// Overrides BIND_ADDR.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Mount widgets into a static HTML page and print the result (preview).
    Render {
        /// HTML page to mount into.
        #[arg(long)]
        page: PathBuf,
        /// URL the page is served from; its query string feeds UTM capture.
        #[arg(long)]
        page_url: Option<url::Url>,
        #[arg(long)]
        referrer: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        /// Overrides the embed script's data-lang.
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        success_url: Option<String>,
        #[arg(long)]
        error_url: Option<String>,
        /// JSON object of label overrides.
        #[arg(long)]
        custom_labels: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    register_lead_form();

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            // Handlers take the visitor's address from each request.
            let ip_lookup = Arc::new(StaticIpLookup(None));
            let services = build_services(&config, Some(config.action_base()), ip_lookup)?;
            let state = AppState::new(config.clone(), services);
            let addr = config.bind_addr;
            tracing::info!(%addr, endpoint = %config.lead_endpoint, "starting lead-form server");
            server::run(addr, state).await?;
        }
        Command::Render {
            page,
            page_url,
            referrer,
            user_agent,
            lang,
            success_url,
            error_url,
            custom_labels,
        } => {
            let html = tokio::fs::read_to_string(&page)
                .await
                .with_context(|| format!("reading page {}", page.display()))?;
            let flags = ScriptDataset {
                lang,
                success_url,
                error_url,
                custom_labels,
            };
            let dataset = (flags != ScriptDataset::default()).then_some(flags);
            let ip_lookup = Arc::new(HttpIpLookup::new(
                config.ip_lookup_url.clone(),
                config.ip_lookup_timeout,
            )?);
            let services = build_services(&config, None, ip_lookup)?;
            let context = PageContext::new(page_url, referrer, user_agent);
            let mounted = mount_page(
                &html,
                dataset.as_ref(),
                ElementRegistry::global(),
                &context,
                &services,
            )?;
            tracing::info!(widgets = mounted.widgets.len(), "mounted widgets into page");
            println!("{}", mounted.html);
        }
    }
    Ok(())
}

fn build_services(
    config: &AppConfig,
    action_base: Option<String>,
    ip_lookup: Arc<dyn IpLookup>,
) -> anyhow::Result<WidgetServices> {
    let mut catalog = LabelCatalog::default();
    if let Some(path) = &config.locales_path {
        catalog.load_toml_file(path)?;
        tracing::info!(path = %path.display(), "loaded extra locales");
    }
    let sink = HttpLeadSink::new(config.lead_endpoint.clone(), config.submit_timeout)?;
    Ok(WidgetServices {
        catalog: Arc::new(catalog),
        ip_lookup,
        sink: Arc::new(sink),
        ip_grace: config.ip_grace,
        action_base,
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
