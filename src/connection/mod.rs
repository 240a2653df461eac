pub mod dialer;
pub mod pool;
pub mod tcp;

pub use dialer::{DialFuture, Dialer, TcpDialer};
#[cfg(unix)]
pub use dialer::UnixDialer;
pub use pool::{ConnFilter, ConnectionPool, PoolEvent, PoolEvents, PoolGuard};
pub use tcp::{AsyncStream, RedisConnection};
