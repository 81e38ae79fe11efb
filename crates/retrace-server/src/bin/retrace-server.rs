use clap::Parser;
use retrace_core::config::RetraceConfig;
use retrace_ocr::ReferenceOcrAdapter;
use retrace_server::cli::{build_search_query, print_search_results, resolve_data_dir, Cli, Command};
use retrace_server::container::ServiceContainer;
use retrace_server::logging::init_logging;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(&cli.data_dir);

    let config = RetraceConfig {
        storage_root: data_dir.clone(),
        ..RetraceConfig::default()
    };

    let _log_guard = init_logging(&data_dir)?;

    match cli.command {
        Command::Serve => run_serve(config).await,
        Command::Search(args) => run_search(config, &args).await,
        Command::Stats => run_stats(config).await,
    }
}

async fn run_serve(config: RetraceConfig) -> anyhow::Result<()> {
    let ocr = Arc::new(ReferenceOcrAdapter::new());
    let container = Arc::new(ServiceContainer::build(config, ocr).await?);
    container.start().await?;
    container
        .lifecycle
        .apply(retrace_server::lifecycle::LifecycleEvent::Launch)
        .await;
    container
        .lifecycle
        .apply(retrace_server::lifecycle::LifecycleEvent::BecomeReady)
        .await;
    container
        .lifecycle
        .apply(retrace_server::lifecycle::LifecycleEvent::Start)
        .await;
    container
        .lifecycle
        .apply(retrace_server::lifecycle::LifecycleEvent::MarkRunning)
        .await;

    let retention_cancel = tokio_util::sync::CancellationToken::new();
    let retention_handle = container.retention.clone().spawn_periodic(retention_cancel.clone());

    // No real platform capture backend ships in this crate (spec.md §6
    // treats it as an external collaborator) — `NullCaptureSource` stands
    // in until a host application supplies one, so this reports
    // `PermissionDenied` rather than silently pretending to capture.
    let capture_cancel = tokio_util::sync::CancellationToken::new();
    let capture_handle = match retrace_server::capture_loop::spawn(
        Box::new(retrace_core::capture::NullCaptureSource::default()),
        container.coordinator.clone(),
        capture_cancel.clone(),
    )
    .await
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "capture loop not started; serving search only");
            None
        }
    };

    let router = retrace_server::routes::build_router(container.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3030").await?;
    tracing::info!(addr = "127.0.0.1:3030", "retrace-server listening");

    let serve = axum::serve(listener, router);
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    retention_cancel.cancel();
    let _ = retention_handle.await;
    capture_cancel.cancel();
    if let Some(handle) = capture_handle {
        let _ = handle.await;
    }

    container
        .lifecycle
        .apply(retrace_server::lifecycle::LifecycleEvent::Terminate)
        .await;
    container.shutdown().await?;
    container
        .lifecycle
        .apply(retrace_server::lifecycle::LifecycleEvent::MarkTerminated)
        .await;
    Ok(())
}

async fn run_search(config: RetraceConfig, args: &retrace_server::cli::SearchArgs) -> anyhow::Result<()> {
    let ocr = Arc::new(ReferenceOcrAdapter::new());
    let container = ServiceContainer::build(config, ocr).await?;
    let query = build_search_query(args)?;
    let results = container.federation.search(&query).await?;
    print_search_results(args, &results);
    Ok(())
}

async fn run_stats(config: RetraceConfig) -> anyhow::Result<()> {
    let ocr = Arc::new(ReferenceOcrAdapter::new());
    let container = ServiceContainer::build(config, ocr).await?;
    let stats = container.primary_db.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
