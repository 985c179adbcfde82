//! Resize-by-name entry point
//!
//! `ResizeFacade::resize` turns an asset name into a finished MP4:
//! locate the input, claim and clear the output path, open the asset, and
//! hand it to the `TranscodePipeline` at the configured target size.
//! Every outcome reaches the caller's completion on the facade's callback
//! context, never synchronously from `resize`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::callback::{CallbackContext, Immediate};
use crate::config::ResizerConfig;
use crate::error::{ResizeError, Result};
use crate::ffmpeg::FfmpegBackend;
use crate::media::{ContainerFormat, MediaBackend, Size};
use crate::pipeline::{TranscodePipeline, TranscodeReport};

/// Resolves an asset name to an input file
pub trait AssetLocator: Send + Sync + 'static {
    fn locate(&self, name: &str) -> Result<PathBuf>;
}

impl<F> AssetLocator for F
where
    F: Fn(&str) -> Result<PathBuf> + Send + Sync + 'static,
{
    fn locate(&self, name: &str) -> Result<PathBuf> {
        self(name)
    }
}

/// Looks up `<root>/<name>.<extension>`
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    root: PathBuf,
    extension: String,
}

impl DirectoryLocator {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetLocator for DirectoryLocator {
    fn locate(&self, name: &str) -> Result<PathBuf> {
        // Names are plain file stems, never paths
        let mut components = Path::new(name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(ResizeError::AssetNotFound(name.to_string()));
        }

        let path = self.root.join(format!("{}.{}", name, self.extension));
        if !path.is_file() {
            return Err(ResizeError::AssetNotFound(name.to_string()));
        }
        Ok(path)
    }
}

/// Where a request's output file goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLocation {
    /// One well-known path, replaced by every request
    Fixed(PathBuf),
    /// `<directory>/<request-id>.<ext>`
    PerRequest { directory: PathBuf },
}

impl OutputLocation {
    pub fn resolve(&self, request_id: Uuid, container: ContainerFormat) -> PathBuf {
        match self {
            OutputLocation::Fixed(path) => path.clone(),
            OutputLocation::PerRequest { directory } => {
                directory.join(format!("{}.{}", request_id, container.extension()))
            }
        }
    }
}

impl Default for OutputLocation {
    fn default() -> Self {
        OutputLocation::Fixed(std::env::temp_dir().join("video.mp4"))
    }
}

/// Output paths currently being written, by owning request
type Claims = Arc<DashMap<PathBuf, Uuid>>;

/// Releases an output path claim when dropped
struct OutputClaim {
    claims: Claims,
    path: PathBuf,
    request_id: Uuid,
}

impl OutputClaim {
    fn acquire(claims: &Claims, path: &Path, request_id: Uuid) -> Result<Self> {
        match claims.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => {
                tracing::warn!(owner = %entry.get(), "output path busy");
                Err(ResizeError::OutputBusy(path.to_path_buf()))
            }
            Entry::Vacant(entry) => {
                entry.insert(request_id);
                Ok(Self {
                    claims: Arc::clone(claims),
                    path: path.to_path_buf(),
                    request_id,
                })
            }
        }
    }
}

impl Drop for OutputClaim {
    fn drop(&mut self) {
        self.claims
            .remove_if(&self.path, |_, owner| *owner == self.request_id);
    }
}

struct Inner<B: MediaBackend, L, C> {
    pipeline: TranscodePipeline<B>,
    locator: L,
    output: OutputLocation,
    target_size: Size,
    context: Arc<C>,
    claims: Claims,
}

pub struct ResizeFacade<B: MediaBackend, L, C> {
    inner: Arc<Inner<B, L, C>>,
}

impl<B, L, C> Clone for ResizeFacade<B, L, C>
where
    B: MediaBackend,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B, L, C> ResizeFacade<B, L, C>
where
    B: MediaBackend,
    L: AssetLocator,
    C: CallbackContext,
{
    pub fn new(
        pipeline: TranscodePipeline<B>,
        locator: L,
        output: OutputLocation,
        target_size: Size,
        context: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                locator,
                output,
                target_size,
                context: Arc::new(context),
                claims: Arc::new(DashMap::new()),
            }),
        }
    }

    pub fn target_size(&self) -> Size {
        self.inner.target_size
    }

    pub fn output_location(&self) -> &OutputLocation {
        &self.inner.output
    }

    /// Requests currently holding an output path
    pub fn in_flight(&self) -> usize {
        self.inner.claims.len()
    }

    /// Resize asset `name` into the configured output location.
    /// Returns the request id used in logs.
    pub fn resize<F>(&self, name: &str, completion: F) -> Uuid
    where
        F: FnOnce(Result<TranscodeReport>) + Send + 'static,
    {
        let request_id = Uuid::new_v4();
        let output = self
            .inner
            .output
            .resolve(request_id, self.inner.pipeline.container());
        self.submit(request_id, name, output, completion)
    }

    /// Resize asset `name` into `output`.
    pub fn resize_to<F>(&self, name: &str, output: impl Into<PathBuf>, completion: F) -> Uuid
    where
        F: FnOnce(Result<TranscodeReport>) + Send + 'static,
    {
        self.submit(Uuid::new_v4(), name, output.into(), completion)
    }

    fn submit<F>(&self, request_id: Uuid, name: &str, output: PathBuf, completion: F) -> Uuid
    where
        F: FnOnce(Result<TranscodeReport>) + Send + 'static,
    {
        let span = tracing::info_span!(
            "resize",
            request_id = %request_id,
            asset = name,
            output = %output.display()
        );
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();

        self.inner.pipeline.runtime().spawn(
            async move {
                tracing::info!("resize requested");
                Inner::start(inner, request_id, name, output, completion).await;
            }
            .instrument(span),
        );

        request_id
    }
}

impl<B, L, C> Inner<B, L, C>
where
    B: MediaBackend,
    L: AssetLocator,
    C: CallbackContext,
{
    async fn start<F>(
        self: Arc<Self>,
        request_id: Uuid,
        name: String,
        output: PathBuf,
        completion: F,
    ) where
        F: FnOnce(Result<TranscodeReport>) + Send + 'static,
    {
        let claim = match OutputClaim::acquire(&self.claims, &output, request_id) {
            Ok(claim) => claim,
            Err(e) => return self.deliver(None, completion, Err(e)),
        };

        let this = Arc::clone(&self);
        let prepare_output = output.clone();
        let span = tracing::Span::current();
        let prepared = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            this.prepare(&name, &prepare_output)
        })
        .await
        .map_err(|e| ResizeError::Worker(format!("resize setup: {}", e)))
        .and_then(|r| r);

        let asset = match prepared {
            Ok(asset) => asset,
            Err(e) => return self.deliver(Some(claim), completion, Err(e)),
        };

        // The pipeline reports on its worker; the claim is released and the
        // result forwarded to the facade's context from there. A refused
        // asset never reaches `forward`, so the pending pair is taken back.
        let pending = Arc::new(Mutex::new(Some((claim, completion))));
        let forward = {
            let this = Arc::clone(&self);
            let pending = Arc::clone(&pending);
            move |result: Result<TranscodeReport>| {
                if let Some((claim, completion)) = pending.lock().take() {
                    this.deliver(Some(claim), completion, result);
                }
            }
        };

        if let Err(e) = self
            .pipeline
            .run(asset, self.target_size, output, Immediate, forward)
        {
            if let Some((claim, completion)) = pending.lock().take() {
                self.deliver(Some(claim), completion, Err(e));
            }
        }
    }

    /// Locate the input, clear the output path and open the asset. Blocking.
    fn prepare(&self, name: &str, output: &Path) -> Result<B::Asset> {
        let input = self.locator.locate(name)?;
        clear_output(output)?;
        let asset = self.pipeline.backend().open_asset(&input)?;
        tracing::debug!(input = %input.display(), "asset opened");
        Ok(asset)
    }

    fn deliver<F>(&self, claim: Option<OutputClaim>, completion: F, result: Result<TranscodeReport>)
    where
        F: FnOnce(Result<TranscodeReport>) + Send + 'static,
    {
        if let Err(e) = &result {
            tracing::warn!(error = %e, "resize failed");
        }
        drop(claim);
        self.context.dispatch(Box::new(move || completion(result)));
    }
}

/// Remove a previous result at `path`. A missing file is fine; any other
/// failure aborts the request.
fn clear_output(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("removed previous output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(ResizeError::Io(e)),
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl<C: CallbackContext> ResizeFacade<FfmpegBackend, DirectoryLocator, C> {
    /// Build an FFmpeg-backed facade from configuration. Sessions run on
    /// `runtime`; completions are dispatched on `context`.
    pub fn from_config(
        config: &ResizerConfig,
        runtime: tokio::runtime::Handle,
        context: C,
    ) -> Result<Self> {
        let backend = FfmpegBackend::new(config.ffmpeg_options()?)?;
        let pipeline =
            TranscodePipeline::new(Arc::new(backend), config.channel_factory()?, runtime);
        let locator = DirectoryLocator::new(&config.assets.directory, &config.assets.extension);
        Ok(Self::new(
            pipeline,
            locator,
            config.output_location(),
            config.target_size(),
            context,
        ))
    }
}
