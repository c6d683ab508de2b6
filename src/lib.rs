pub mod client;
pub mod config;
pub mod core;
pub mod errors;
pub mod logging;
pub mod request;

// Re-export commonly used items for convenience
pub use client::NlsClient;
pub use config::{AddressFamily, ClientConfig, LogConfig, PoolConfig};
pub use core::*;
pub use errors::{NlsError, NlsResult};
pub use request::dialog::DialogVersion;
pub use request::{
    AudioInput, Controllable, DashCosyVoiceSynthesizerRequest, DashParaformerTranscriberRequest,
    DialogAssistantRequest, FlowingSynthesizerRequest, Recognition, Request, Sentences,
    ServiceSpec, SpeechRecognizerRequest, SpeechSynthesizerRequest, SpeechTranscriberRequest,
    Synthesis, TextInput,
};
