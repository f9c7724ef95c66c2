//! Plaintext stats listener.
//!
//! Serves a tiny text snapshot of pool state over HTTP, one response per
//! connection. Meant for curl and load-test harnesses, not for production
//! exposure.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use bulkhead_core::adaptive::AdaptivePool;
use tracing::debug;

/// Bind `addr` and serve pool stats on a background thread.
///
/// Returns the bound address so callers can use port 0. The thread runs for
/// the life of the process; the listener is never handed back.
pub(crate) fn spawn_stats_listener(
    addr: &str,
    pool: Arc<AdaptivePool>,
) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr)?;
    let local_addr = listener.local_addr()?;

    thread::Builder::new()
        .name("bulkhead-debug".into())
        .spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let body = format!(
                    "active_workers {}\nqueue_depth {}\n",
                    pool.active_workers(),
                    pool.queue_depth()
                );
                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: text/plain\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{body}",
                    body.len()
                );
                if let Err(e) = stream.write_all(response.as_bytes()) {
                    debug!("stats response failed: {e}");
                }
            }
        })?;

    Ok(local_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpStream;
    use std::time::Duration;

    #[test]
    fn test_serves_pool_stats() {
        let pool = Arc::new(AdaptivePool::new(2, 1, 8, Duration::from_secs(1)));
        let addr = spawn_stats_listener("127.0.0.1:0", Arc::clone(&pool)).unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("active_workers 1"));
        assert!(response.contains("queue_depth 0"));
    }
}
