//! In-memory media backend for pipeline and facade tests
//!
//! An asset is a small text file: a `tag=<name>` token plus one token per
//! track (`audio`, `video`). Every track yields `Script::samples` samples
//! whose payload names the tag, kind and sequence number. The writer
//! journals what it sees and, on finalize, writes the payloads to the
//! output path, one per line, refusing to overwrite.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{ResizeError, Result};
use crate::factory::{ChannelFactory, ChannelPlan};
use crate::media::{
    Asset, AssetReader, AssetWriter, ContainerFormat, MediaBackend, MediaKind, Readiness,
    SampleSink, SampleSource, TrackFormat, TrackInfo,
};
use crate::pipeline::TranscodePipeline;

#[derive(Debug, Clone)]
pub struct MemorySample {
    pub kind: MediaKind,
    pub seq: u32,
    pub payload: Bytes,
}

/// Behavior knobs of one backend
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub samples: u32,
    /// Sleep before producing each sample of this kind
    pub delay: Option<(MediaKind, Duration)>,
    /// The writer input of this kind rejects this sequence number
    pub reject: Option<(MediaKind, u32)>,
    /// The reader reports this failure after its sources drained
    pub read_error: Option<String>,
}

impl Script {
    pub fn samples(samples: u32) -> Self {
        Self {
            samples,
            ..Default::default()
        }
    }
}

/// Everything the backend observed, across all sessions
#[derive(Debug, Default)]
pub struct Journal {
    pub assets_opened: usize,
    pub writers_created: usize,
    pub appended: Vec<(MediaKind, u32)>,
    pub finished: Vec<MediaKind>,
    pub finalize_calls: usize,
    /// Inputs already finished when finalize ran
    pub finished_at_finalize: Vec<usize>,
}

impl Journal {
    pub fn appended_of(&self, kind: MediaKind) -> Vec<u32> {
        self.appended
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, seq)| *seq)
            .collect()
    }
}

pub type SharedJournal = Arc<Mutex<Journal>>;

pub struct MemoryBackend {
    script: Script,
    journal: SharedJournal,
}

impl MemoryBackend {
    pub fn new(script: Script) -> (Self, SharedJournal) {
        let journal = SharedJournal::default();
        (
            Self {
                script,
                journal: Arc::clone(&journal),
            },
            journal,
        )
    }
}

#[derive(Debug, Clone)]
pub struct MemoryAsset {
    tag: String,
    tracks: Vec<TrackInfo>,
}

impl MemoryAsset {
    pub fn parse(content: &str) -> Self {
        let mut tag = String::new();
        let mut tracks = Vec::new();
        for token in content.split_whitespace() {
            let format = match token {
                "audio" => TrackFormat::Audio {
                    sample_rate: 48_000,
                    channels: 2,
                },
                "video" => TrackFormat::Video {
                    width: 640,
                    height: 360,
                    frame_rate: 25.0,
                },
                other => {
                    if let Some(value) = other.strip_prefix("tag=") {
                        tag = value.to_string();
                    }
                    continue;
                }
            };
            tracks.push(TrackInfo {
                index: tracks.len(),
                codec: "mem".into(),
                format,
            });
        }
        Self { tag, tracks }
    }
}

impl Asset for MemoryAsset {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }
}

impl MediaBackend for MemoryBackend {
    type Sample = MemorySample;
    type Asset = MemoryAsset;
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn open_asset(&self, path: &Path) -> Result<MemoryAsset> {
        let content = std::fs::read_to_string(path)?;
        self.journal.lock().assets_opened += 1;
        Ok(MemoryAsset::parse(&content))
    }

    fn create_reader(&self, asset: &MemoryAsset) -> Result<MemoryReader> {
        Ok(MemoryReader {
            tag: asset.tag.clone(),
            script: self.script.clone(),
            attached: Vec::new(),
            started: false,
            error: Mutex::new(None),
        })
    }

    fn create_writer(&self, output: &Path, _container: ContainerFormat) -> Result<MemoryWriter> {
        if output.exists() {
            return Err(ResizeError::OutputExists(output.to_path_buf()));
        }
        self.journal.lock().writers_created += 1;
        Ok(MemoryWriter {
            path: output.to_path_buf(),
            reject: self.script.reject,
            journal: Arc::clone(&self.journal),
            payloads: Arc::default(),
            error: Arc::default(),
            inputs: Vec::new(),
            started: false,
        })
    }
}

pub struct MemoryReader {
    tag: String,
    script: Script,
    attached: Vec<usize>,
    started: bool,
    error: Mutex<Option<String>>,
}

impl AssetReader for MemoryReader {
    type Sample = MemorySample;
    type Output = MemorySource;

    fn can_add_output(&self, plan: &ChannelPlan) -> bool {
        !self.started && !self.attached.contains(&plan.track.index)
    }

    fn add_output(&mut self, plan: &ChannelPlan) -> Result<MemorySource> {
        self.attached.push(plan.track.index);
        let kind = plan.kind();
        let samples = (0..self.script.samples)
            .map(|seq| MemorySample {
                kind,
                seq,
                payload: Bytes::from(format!("{}:{}:{}", self.tag, kind, seq)),
            })
            .collect();
        let delay = match self.script.delay {
            Some((k, d)) if k == kind => Some(d),
            _ => None,
        };
        Ok(MemorySource { samples, delay })
    }

    fn start_reading(&mut self) -> Result<()> {
        self.started = true;
        *self.error.lock() = self.script.read_error.clone();
        Ok(())
    }

    fn take_error(&self) -> Option<ResizeError> {
        self.error.lock().take().map(ResizeError::Read)
    }
}

pub struct MemorySource {
    samples: VecDeque<MemorySample>,
    delay: Option<Duration>,
}

impl SampleSource for MemorySource {
    type Sample = MemorySample;

    fn copy_next_sample(&mut self) -> Option<MemorySample> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.samples.pop_front()
    }
}

pub struct MemoryWriter {
    path: PathBuf,
    reject: Option<(MediaKind, u32)>,
    journal: SharedJournal,
    payloads: Arc<Mutex<Vec<Bytes>>>,
    error: Arc<Mutex<Option<ResizeError>>>,
    inputs: Vec<MediaKind>,
    started: bool,
}

impl AssetWriter for MemoryWriter {
    type Sample = MemorySample;
    type Input = MemorySink;

    fn can_add_input(&self, plan: &ChannelPlan) -> bool {
        !self.started && !self.inputs.contains(&plan.kind())
    }

    fn add_input(&mut self, plan: &ChannelPlan) -> Result<MemorySink> {
        let kind = plan.kind();
        self.inputs.push(kind);
        Ok(MemorySink {
            kind,
            reject: match self.reject {
                Some((k, seq)) if k == kind => Some(seq),
                _ => None,
            },
            journal: Arc::clone(&self.journal),
            payloads: Arc::clone(&self.payloads),
            error: Arc::clone(&self.error),
        })
    }

    fn start_writing(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn start_session(&mut self, _at_source_time: Duration) {}

    fn take_error(&self) -> Option<ResizeError> {
        None
    }

    fn finish_writing(self) -> Result<()> {
        {
            let mut journal = self.journal.lock();
            journal.finalize_calls += 1;
            let finished = journal.finished.len();
            journal.finished_at_finalize.push(finished);
        }
        if let Some(err) = self.error.lock().take() {
            return Err(err);
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| ResizeError::Finalize(format!("{}: {}", self.path.display(), e)))?;
        for payload in self.payloads.lock().iter() {
            file.write_all(payload)?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}

pub struct MemorySink {
    kind: MediaKind,
    reject: Option<u32>,
    journal: SharedJournal,
    payloads: Arc<Mutex<Vec<Bytes>>>,
    error: Arc<Mutex<Option<ResizeError>>>,
}

impl SampleSink for MemorySink {
    type Sample = MemorySample;

    fn is_ready_for_more(&self) -> bool {
        true
    }

    fn wait_for_readiness(&self) -> Readiness {
        Readiness::Ready
    }

    fn append(&mut self, sample: MemorySample) -> bool {
        if self.reject == Some(sample.seq) {
            let mut error = self.error.lock();
            if error.is_none() {
                *error = Some(ResizeError::Append {
                    kind: self.kind,
                    message: format!("sample {} rejected", sample.seq),
                });
            }
            return false;
        }
        self.journal.lock().appended.push((sample.kind, sample.seq));
        self.payloads.lock().push(sample.payload);
        true
    }

    fn mark_as_finished(&mut self) {
        self.journal.lock().finished.push(self.kind);
    }
}

/// Write an asset file `<dir>/<name>.mp4` in the format `MemoryAsset` parses.
pub fn write_asset(dir: &Path, name: &str, tag: &str, kinds: &[MediaKind]) -> PathBuf {
    let mut content = format!("tag={}", tag);
    for kind in kinds {
        content.push(' ');
        content.push_str(&kind.to_string());
    }
    let path = dir.join(format!("{}.mp4", name));
    std::fs::write(&path, content).expect("write asset fixture");
    path
}

pub fn memory_pipeline(script: Script) -> (TranscodePipeline<MemoryBackend>, SharedJournal) {
    let (backend, journal) = MemoryBackend::new(script);
    let pipeline = TranscodePipeline::new(
        Arc::new(backend),
        ChannelFactory::default(),
        tokio::runtime::Handle::current(),
    );
    (pipeline, journal)
}
