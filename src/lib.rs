//! A bidirectional filtered proxy core: mediates two buffered sockets,
//! dispatching bytes to caller-supplied [`filter::Filter`]s that steer how
//! much to read next and may rewrite, defer, or redirect what gets written
//! to the opposite side.

pub mod config;
pub mod direction;
pub mod engine;
pub mod error;
pub mod filter;
pub mod instruction;
mod logging;
pub mod net;
pub mod sockbuf;
mod sys;

pub use config::EngineConfig;
pub use direction::{Direction, PerDirection};
pub use engine::{
    bidirectional_filtered_proxy_core, bidirectional_filtered_proxy_ex, unidirectional_proxy,
    CoreOutcome, FilterPair, ProxyPair, UnidirectionalOutcome,
};
pub use error::{ErrorClass, ProxyError, ProxyResult};
pub use filter::{DeadFilter, Filter, PassthroughFilter};
pub use instruction::{Decision, Instruction, Knowable};
pub use net::socket::ProxySocket;
pub use sockbuf::{Placeholder, PlaceholderHandle, SockBuf};
