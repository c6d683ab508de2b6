pub mod directive;
pub mod encoder;
pub mod event;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-export commonly used types for convenience
pub use encoder::{AudioEncoder, EncoderError, EncoderFactory, EncoderType, PcmPassthrough};

pub use event::{
    Event, EventKind, EventPayload, RecognitionResult, StashResult, SynthesisResult,
    WakeWordResult, WordInfo,
};

pub use node::{
    ApiCall, CallbackMode, CallbackTable, ConnectionNode, Diagnostics, EventCallback, ExitStatus,
    NodeState, RequestTimeouts,
};

pub use protocol::{DecodeMode, DecodeOutcome, Dialect, RequiredFields, Translator};

pub use registry::{NodeManager, OwnerId, RequestId};

pub use transport::{
    ChannelConnector, ChannelMessage, ConnectTarget, PreconnectedPool, TransportChannel,
    TransportError, WebSocketConnector,
};
