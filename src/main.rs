use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process,
};

use reqview::{
    application::{
        error::AppError,
        render::{
            DocumentPage, FullRenderLatch, RenderOutputs, RenderRequest, RenderWorker,
            RenderedItem, ViewFilter, ViewMode,
        },
    },
    config::{self, RenderArgs, Settings, WatchArgs},
    infra::{
        error::InfraError,
        store::{self, LoadedDocument},
        telemetry,
        watcher::{ChangeEvent, DocumentWatcher},
    },
};
use serde::Serialize;
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Watch(args) => run_watch(settings, args).await,
    }
}

/// One line of `render --events` output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventLine<'a> {
    Result(&'a RenderedItem),
    Progress { value: u8 },
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<(), AppError> {
    let (root, document) = open_document(&args.dir, args.focus.as_deref())?;
    let mut page = build_page(&document, args.view, args.focus.clone());

    let (worker, mut outputs) = RenderWorker::new(settings.render.options());
    let generation = worker.render(request_for(&document, &root, false, args.focus.as_deref()));
    debug!(generation, "Submitted full render");

    let mut stdout = io::stdout();
    let mut footer_seen = false;
    loop {
        tokio::select! {
            biased;
            rendered = outputs.results.recv() => {
                let rendered = rendered
                    .ok_or_else(|| AppError::unexpected("render worker stopped before the footer"))?;
                footer_seen |= accept_result(&mut page, &mut stdout, args.events, generation, rendered)?;
            }
            value = outputs.progress.recv() => {
                let value = value
                    .ok_or_else(|| AppError::unexpected("render worker stopped before finishing"))?;
                // Results sent before this progress value are already queued.
                while let Ok(rendered) = outputs.results.try_recv() {
                    footer_seen |=
                        accept_result(&mut page, &mut stdout, args.events, generation, rendered)?;
                }
                if args.events {
                    write_event(&mut stdout, &EventLine::Progress { value })?;
                }
                if value == 100 {
                    if !footer_seen {
                        warn!(generation, "Render finished without a footer block");
                    }
                    break;
                }
            }
        }
    }
    worker.destroy();

    if args.events {
        return Ok(());
    }

    let html = page.render();
    match args.output {
        Some(path) => {
            write_page(&path, &html).await?;
            info!(path = %path.display(), "Wrote document page");
        }
        None => {
            stdout.write_all(html.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn run_watch(settings: Settings, args: WatchArgs) -> Result<(), AppError> {
    let (root, mut document) = open_document(&args.dir, args.focus.as_deref())?;
    let mut page = build_page(&document, args.view, args.focus.clone());

    let (worker, outputs) = RenderWorker::new(settings.render.options());
    let RenderOutputs {
        mut results,
        mut progress,
    } = outputs;
    let mut current = worker.render(request_for(&document, &root, false, args.focus.as_deref()));
    let mut latch = FullRenderLatch::default();
    latch.submitted(current, false);

    let (watcher, mut changes) = DocumentWatcher::start(&root, settings.watch.debounce)?;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted; stopping watch");
                break;
            }
            change = changes.recv() => {
                let Some(change) = change else {
                    warn!("File watcher stopped; ending watch");
                    break;
                };
                let partial =
                    matches!(change, ChangeEvent::ItemsChanged(_)) && latch.allows_partial();
                match store::load_document(&root) {
                    Ok(reloaded) => {
                        document = reloaded;
                        page.set_items(&document.items);
                        current = worker.render(
                            request_for(&document, &root, partial, args.focus.as_deref()),
                        );
                        latch.submitted(current, partial);
                        debug!(generation = current, partial, "Submitted render after change");
                    }
                    Err(err) => warn!(error = %err, "Failed to reload document; keeping last page"),
                }
            }
            rendered = results.recv() => {
                let Some(rendered) = rendered else {
                    return Err(AppError::unexpected("render worker stopped unexpectedly"));
                };
                latch.observe(&rendered);
                page.apply(rendered);
            }
            value = progress.recv() => {
                let Some(value) = value else {
                    return Err(AppError::unexpected("render worker stopped unexpectedly"));
                };
                if value == 100 {
                    while let Ok(rendered) = results.try_recv() {
                        latch.observe(&rendered);
                        page.apply(rendered);
                    }
                    write_page(&args.output, &page.render()).await?;
                    info!(
                        path = %args.output.display(),
                        generation = current,
                        "Updated document page"
                    );
                }
            }
        }
    }

    worker.destroy();
    info!(dir = %watcher.dir().display(), "Stopped watching document directory");
    Ok(())
}

/// Load the document and check that the focused item exists.
fn open_document(dir: &Path, focus: Option<&str>) -> Result<(PathBuf, LoadedDocument), AppError> {
    let root = std::fs::canonicalize(dir).map_err(|err| InfraError::read(dir, err))?;
    let document = store::load_document(&root)?;

    if let Some(uid) = focus
        && !document.items.iter().any(|revision| revision.uid() == uid)
    {
        return Err(AppError::validation(format!(
            "item `{uid}` is not part of document `{}`",
            document.title()
        )));
    }

    info!(
        document = %document.title(),
        items = document.items.len(),
        root = %root.display(),
        "Loaded document"
    );
    Ok((root, document))
}

fn build_page(document: &LoadedDocument, view: ViewMode, focus: Option<String>) -> DocumentPage {
    let mut page = DocumentPage::new(document.title(), &document.items);
    page.set_filter(ViewFilter::new(view, focus));
    page
}

fn request_for(
    document: &LoadedDocument,
    root: &Path,
    partial: bool,
    focus: Option<&str>,
) -> RenderRequest {
    let items = document.items.clone();
    let request = if partial {
        RenderRequest::partial(items, root)
    } else {
        RenderRequest::full(items, root)
    };
    match focus {
        Some(uid) => request.focus_first(uid),
        None => request,
    }
}

/// Apply one result to the page, echoing it in events mode. Returns whether it
/// was the footer of the awaited generation.
fn accept_result(
    page: &mut DocumentPage,
    out: &mut impl Write,
    events: bool,
    generation: u64,
    rendered: RenderedItem,
) -> Result<bool, AppError> {
    let done = rendered.is_footer() && rendered.generation == generation;
    if events {
        write_event(out, &EventLine::Result(&rendered))?;
    }
    page.apply(rendered);
    Ok(done)
}

fn write_event(out: &mut impl Write, event: &EventLine<'_>) -> Result<(), AppError> {
    let line = serde_json::to_string(event)
        .map_err(|err| AppError::unexpected(format!("failed to encode event: {err}")))?;
    writeln!(out, "{line}")?;
    Ok(())
}

async fn write_page(path: &Path, html: &str) -> Result<(), AppError> {
    tokio::fs::write(path, html)
        .await
        .map_err(|err| InfraError::write(path, err))?;
    Ok(())
}
