//! LLSync protocol core.
//!
//! ```text
//!  Transport ─▶ slice (deframe) ─▶ router ─┬─▶ auth / dynreg ─▶ identity
//!                                          ├─▶ ota
//!                                          └─▶ data template port
//!  notifier ◀──────────────────────────────┘
//!     └─▶ slice (frame) ─▶ Transport
//! ```

pub mod adv;
pub mod auth;
pub mod channels;
pub mod dynreg;
pub mod identity;
pub mod msg;
pub mod notifier;
pub mod ota;
pub mod router;
pub mod slice;
