use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("connection pool is full (max {0} pooled connections)")]
    Full(usize),

    #[error("close queue send failed, pool is shutting down")]
    Closed,
}
