//! Transcode pipeline
//!
//! One session per request:
//! 1. plan channels (first audio, first video)
//! 2. create reader and writer, attach every plan to both
//! 3. start writing, open the session at zero, start reading
//! 4. fan out: one worker per channel
//! 5. fan in through a `JoinBarrier`, then check the reader, finalize the
//!    writer and report exactly once on the caller's context

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::Instrument;

use crate::callback::CallbackContext;
use crate::error::{ResizeError, Result};
use crate::factory::{ChannelFactory, ChannelPlan};
use crate::media::{AssetReader, AssetWriter, ContainerFormat, MediaBackend, Size};
use crate::transfer::{ChannelReport, JoinBarrier, SampleChannel};

/// Summary of a successful transcode
#[derive(Debug, Clone)]
pub struct TranscodeReport {
    pub output: PathBuf,
    pub channels: Vec<ChannelReport>,
    pub elapsed: Duration,
}

type Channel<B> = SampleChannel<
    <<B as MediaBackend>::Reader as AssetReader>::Output,
    <<B as MediaBackend>::Writer as AssetWriter>::Input,
>;

pub struct TranscodePipeline<B: MediaBackend> {
    backend: Arc<B>,
    factory: ChannelFactory,
    container: ContainerFormat,
    runtime: Handle,
}

impl<B: MediaBackend> TranscodePipeline<B> {
    /// Sessions are spawned on `runtime`, so `run` may be called from any
    /// thread.
    pub fn new(backend: Arc<B>, factory: ChannelFactory, runtime: Handle) -> Self {
        Self {
            backend,
            factory,
            container: ContainerFormat::Mp4,
            runtime,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn factory(&self) -> &ChannelFactory {
        &self.factory
    }

    pub fn container(&self) -> ContainerFormat {
        self.container
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Transcode `asset` into `output` and deliver the result to
    /// `on_complete`, exactly once, on `context`.
    ///
    /// Errors detected before anything starts (an asset without audio or
    /// video, invalid settings) are returned directly and `on_complete` is
    /// never invoked.
    pub fn run<C, F>(
        &self,
        asset: B::Asset,
        target_size: Size,
        output: PathBuf,
        context: C,
        on_complete: F,
    ) -> Result<()>
    where
        C: CallbackContext,
        F: FnOnce(Result<TranscodeReport>) + Send + 'static,
    {
        let plans = self.factory.require_channels(&asset, target_size)?;
        let backend = Arc::clone(&self.backend);
        let container = self.container;
        let span = tracing::info_span!("transcode", output = %output.display());

        self.runtime.spawn(
            async move {
                let session = tokio::spawn(
                    run_session(backend, asset, plans, output, container).in_current_span(),
                );
                let result = match session.await {
                    Ok(result) => result,
                    Err(e) => Err(ResizeError::Worker(format!("transcode session: {}", e))),
                };
                match &result {
                    Ok(report) => tracing::info!(
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        "transcode finished"
                    ),
                    Err(e) => tracing::warn!(error = %e, "transcode failed"),
                }
                context.dispatch(Box::new(move || on_complete(result)));
            }
            .instrument(span),
        );

        Ok(())
    }

    /// Async form of `run`: resolves to the session's result.
    pub async fn transcode(
        &self,
        asset: B::Asset,
        target_size: Size,
        output: PathBuf,
    ) -> Result<TranscodeReport> {
        let plans = self.factory.require_channels(&asset, target_size)?;
        let span = tracing::info_span!("transcode", output = %output.display());
        run_session(Arc::clone(&self.backend), asset, plans, output, self.container)
            .instrument(span)
            .await
    }
}

async fn run_session<B: MediaBackend>(
    backend: Arc<B>,
    asset: B::Asset,
    plans: Vec<ChannelPlan>,
    output: PathBuf,
    container: ContainerFormat,
) -> Result<TranscodeReport> {
    let started = Instant::now();

    let setup_output = output.clone();
    let span = tracing::Span::current();
    let (mut reader, mut writer, channels) = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        attach_channels(&*backend, &asset, &plans, &setup_output, container)
    })
    .await
    .map_err(|e| ResizeError::Worker(format!("session setup: {}", e)))??;

    writer.start_writing()?;
    writer.start_session(Duration::ZERO);
    if let Some(err) = writer.take_error() {
        return Err(err);
    }

    reader.start_reading()?;

    let expected = channels.len();
    tracing::info!(channels = expected, "transfer started");

    let (barrier, arrivals) = JoinBarrier::new(expected);
    for (channel, arrival) in channels.into_iter().zip(arrivals) {
        channel.start_transfer(move |report| arrival.arrive(report));
    }
    let reports = barrier.wait().await;

    if let Some(err) = reader.take_error() {
        return Err(err);
    }
    drop(reader);

    tokio::task::spawn_blocking(move || writer.finish_writing())
        .await
        .map_err(|e| ResizeError::Worker(format!("finalize: {}", e)))??;

    if let Some(failed) = reports.iter().find(|r| r.is_failure()) {
        return Err(ResizeError::ChannelFailed {
            kind: failed.kind,
            track_index: failed.track_index,
        });
    }
    if reports.len() < expected {
        return Err(ResizeError::Worker(format!(
            "{} of {} channel workers exited without reporting",
            expected - reports.len(),
            expected
        )));
    }

    Ok(TranscodeReport {
        output,
        channels: reports,
        elapsed: started.elapsed(),
    })
}

/// Create the reader and writer and attach each plan to both, so the two
/// always carry the same set of tracks.
fn attach_channels<B: MediaBackend>(
    backend: &B,
    asset: &B::Asset,
    plans: &[ChannelPlan],
    output: &Path,
    container: ContainerFormat,
) -> Result<(B::Reader, B::Writer, Vec<Channel<B>>)> {
    let mut reader = backend.create_reader(asset)?;
    let mut writer = backend.create_writer(output, container)?;

    let mut channels = Vec::with_capacity(plans.len());
    for plan in plans {
        if !reader.can_add_output(plan) || !writer.can_add_input(plan) {
            tracing::warn!(
                kind = %plan.kind(),
                track = plan.track.index,
                "track refused by reader or writer, skipping"
            );
            continue;
        }
        let source = reader.add_output(plan)?;
        let destination = writer.add_input(plan)?;
        channels.push(SampleChannel::new(
            plan.kind(),
            plan.track.index,
            source,
            destination,
        ));
    }

    if channels.is_empty() {
        return Err(ResizeError::NoMediaTracks);
    }

    Ok((reader, writer, channels))
}
