//! 测试共享工具
//!
//! 提供各外部能力接口的内存实现, 以及快照测试数据构造器。
//!
//! ```toml
//! [dev-dependencies]
//! executor-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;
pub mod transfer;

pub use builders::*;
pub use mocks::*;
pub use transfer::*;
