//! Support code shared by the USB host-controller driver: register access, the DMA pool,
//! logging setup and busy-wait timeouts.

pub mod dma;
pub mod io;
pub mod logger;
pub mod timeout;
