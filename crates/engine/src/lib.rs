//! LuaScope engine: runtime value model and stack reconstruction.
//!
//! Everything the IDE shows about a suspended interpreter flows through
//! here: dump payloads are executed in a sandboxed Lua VM and walked into
//! coroutine/frame structures, values are classified into a closed variant
//! set with display metadata, and table children are paged deterministically.

pub mod children;
pub mod dump;
pub mod stack;
pub mod userdata;
pub mod value;

pub use children::{ChildPage, Continuation};
pub use dump::{CoroutineStackInfo, FrameInfo, StackDump};
pub use stack::{ExecFrame, ExecutionStack, FallbackPosition, SourceResolver};
pub use value::{RValue, TableKey, TableSnapshot, ValueIcon, Variable};
