pub mod broll;
pub mod ffmpeg;
pub mod filters;
pub mod ocr;
pub mod pipeline;
pub mod strategy;
pub mod transcribe;

pub use broll::{BRollSource, PexelsBRoll};
pub use ocr::{caption_placement, FrameTextDetector, TesseractDetector, TextRegion};
pub use pipeline::{Renderer, TransformOutcome, TransformPipeline, TransformRequest};
pub use strategy::{preset_strategy, StrategyPlanner};
pub use transcribe::{HttpTranscriber, Transcriber};
