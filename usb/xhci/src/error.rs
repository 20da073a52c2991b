use common::dma::DmaError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum XhciError {
    #[error("slot id {0} is out of range")]
    InvalidSlotId(u8),
    #[error("slot {0} is already occupied")]
    SlotOccupied(u8),
    #[error("no device in slot {0}")]
    NoSuchSlot(u8),
    #[error("no device attached to port {0}")]
    NoDeviceOnPort(u8),
    #[error("port {0} already has a device")]
    AlreadyAttached(u8),
    #[error("port {0} does not exist")]
    InvalidPort(u8),
    #[error("no device connected to the port")]
    PortNotConnected,
    #[error("port reports an unknown speed id {0}")]
    UnknownSpeed(u8),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("DMA allocation failed: {0}")]
    Dma(#[from] DmaError),
    #[error("too many control transfers in flight")]
    SetupStageMapFull,
    #[error("endpoint {0} has no transfer ring")]
    NoTransferRing(u8),
    #[error("transfer completed with code {0}")]
    TransferFailed(u8),
    #[error("unexpected completion for request {request:#04x} in phase {phase}")]
    UnexpectedCompletion { phase: u8, request: u8 },
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(&'static str),
    #[error("enumeration step failed: {0}")]
    StepFailed(&'static str),
    #[error("the event dispatcher went away")]
    Disconnected,
    #[error("unsupported controller: {0}")]
    Unsupported(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = XhciError> = std::result::Result<T, E>;
