//! Rendering on a dedicated thread.
//!
//! The caller keeps its own thread free and follows the render through
//! [`RenderEvent`]s. Whatever ends the render, the pages laid out so far are
//! written to the output file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::model::Document;
use crate::pdf::{Completion, Renderer};

/// Notification sent by the render thread.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderEvent {
    /// Percentage of top-level items laid out.
    Progress(u8),
    /// The render finished; `terminated` when it was cancelled.
    Done { terminated: bool },
    Error(String),
}

/// Handle to a running render.
#[derive(Debug)]
pub struct RenderHandle {
    events: Receiver<RenderEvent>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<Completion>>>,
}

impl RenderHandle {
    pub fn events(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    /// Ask the render to stop. Pages already laid out are still saved.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Block until the render thread exits.
    pub fn wait(mut self) -> Result<Completion> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(Error::Pdf("render thread panicked".into()))),
            None => Ok(Completion::Done),
        }
    }
}

/// Start rendering `doc` into the file at `output`.
pub fn spawn(doc: Document, renderer: Renderer, output: PathBuf) -> Result<RenderHandle> {
    let (tx, rx) = channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let thread = std::thread::Builder::new()
        .name("md-pdf-render".into())
        .spawn(move || {
            let result = render_to_file(&doc, &renderer, &output, &flag, &tx);
            let _ = tx.send(match &result {
                Ok(done) => RenderEvent::Done {
                    terminated: *done == Completion::Cancelled,
                },
                Err(e) => RenderEvent::Error(e.to_string()),
            });
            result
        })?;

    Ok(RenderHandle {
        events: rx,
        cancel,
        thread: Some(thread),
    })
}

fn render_to_file(
    doc: &Document,
    renderer: &Renderer,
    output: &Path,
    cancel: &AtomicBool,
    tx: &Sender<RenderEvent>,
) -> Result<Completion> {
    let t0 = Instant::now();
    let mut canvas = renderer.canvas();
    let outcome = renderer.render(&mut canvas, doc, cancel, &mut |percent| {
        let _ = tx.send(RenderEvent::Progress(percent));
    });
    let t_render = t0.elapsed();

    // Partial documents are saved too.
    let bytes = canvas.finish()?;
    std::fs::write(output, &bytes)?;
    log::info!(
        "Timing: render={:.1}ms, write={:.1}ms (output {} bytes)",
        t_render.as_secs_f64() * 1000.0,
        (t0.elapsed() - t_render).as_secs_f64() * 1000.0,
        bytes.len(),
    );
    outcome
}
