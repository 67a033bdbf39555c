//! # crab-link
//!
//! Printer connection lifecycle and print delivery.
//!
//! ## 模块
//!
//! - [`manager`]: 对外入口 [`PrinterManager`]
//! - `machine`: 每台打印机一个状态机 actor (连接、掉线、重连、打印)
//! - [`pipeline`]: 通道解析、分块、节流写入
//! - [`registry`] / [`store`]: 打印机元数据与持久化快照
//! - [`notifier`]: 多上下文之间的链路状态同步
//! - [`monitor`]: 周期性存活检测
//!
//! ## Example
//!
//! ```ignore
//! use crab_link::{LinkConfig, MemoryStore, PrinterManager};
//! use crab_printer::{NetworkTransport, PrintPayload};
//! use shared::models::PrinterKind;
//! use std::sync::Arc;
//!
//! let manager = PrinterManager::builder(LinkConfig::from_env(), Arc::new(MemoryStore::new()))
//!     .transport(Arc::new(NetworkTransport::new()))
//!     .build()?;
//!
//! let printer = manager.register(PrinterKind::NetworkSocket, "192.168.1.100", "Kitchen")?;
//! manager.connect(&printer.id, false).await?;
//! manager.print_all(&PrintPayload::from("Order #42")).await?;
//! ```

pub mod config;
pub mod error;
pub mod logger;
mod machine;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod notifier;
pub mod picker;
pub mod pipeline;
pub mod registry;
pub mod store;

// Re-exports
pub use config::LinkConfig;
pub use error::{LinkError, LinkResult, StoreError, StoreResult};
pub use machine::{ConnectOutcome, match_candidate};
pub use manager::{
    PrintOutcome, PrinterManager, PrinterManagerBuilder, ReconnectOutcome, StatusSummary,
    validate_address,
};
pub use metrics::MetricsSnapshot;
pub use monitor::Visibility;
pub use notifier::{ContextBus, LocalBus};
pub use picker::{DevicePicker, NamePrefixPicker, NoPicker};
pub use pipeline::{ChannelResolver, ChannelStrategy, ChunkPlan, DeliveryReport};
pub use store::{JsonFileStore, MemoryStore, RedbStore, SnapshotStore};
