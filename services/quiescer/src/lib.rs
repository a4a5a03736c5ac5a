//! Quiesce thrasher library
//!
//! Fault injection for clustered filesystems: each quiescer repeatedly freezes
//! a path of one filesystem ("quiesce"), holds it for a randomized duration and
//! releases it, while a workload under test keeps running.
//!
//! ## Architecture
//!
//! ```text
//! ThrasherGroup
//! └── QuiescerHandle(fs)        (one actor per filesystem)
//!     └── QuiesceCycle          (quiesce -> hold -> release)
//!         └── LeaderClient      (follows coordinator redirects)
//!             ├── CommandTransport
//!             └── Topology
//! ```
//!
//! ## Modules
//!
//! - `actor`: Quiescer actor lifecycle and run loop
//! - `group`: Collective stop/join and failure surfacing
//! - `cycle`: One quiesce/hold/release cycle
//! - `client`: Leader-redirect command client
//! - `duration`: Randomized quiesce durations
//! - `transport`: Command transport and topology seams, plus a mock cluster
//! - `ceph`: Cluster CLI implementation of the seams

pub mod actor;
pub mod ceph;
pub mod client;
pub mod config;
pub mod cycle;
pub mod duration;
pub mod error;
pub mod group;
pub mod shutdown;
pub mod transport;

// Re-export commonly used types
pub use actor::{ActorState, Quiescer, QuiescerHandle};
pub use config::{ActorConfig, ActorSettings};
pub use error::{ConfigError, ExitCode, QuiesceError};
pub use group::{Thrasher, ThrasherGroup};
pub use transport::{CommandOutput, CommandRequest, CommandTransport, MockCluster, NodeId, Topology};
