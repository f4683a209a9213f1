/// The TCM DMA engine.
pub mod dma;
