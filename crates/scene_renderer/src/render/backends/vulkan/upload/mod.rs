//! Resource upload pipeline (staging, copies, layout transitions, mip generation)

pub mod barriers;
pub mod mip_chain;
pub mod staging;
