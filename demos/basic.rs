//! Basic usage against a local echo server

use esox_connpool::{Pool, PoolConfiguration, TcpConnectionFactory};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== esox_connpool - Basic Example ===\n");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let config = PoolConfiguration::new()
        .with_max_capacity(10)
        .with_initial_idle(5)
        .with_idle_timeout(Duration::from_secs(30))
        .with_io_timeouts(Duration::from_secs(1), Duration::from_secs(1));
    let pool = Pool::new(TcpConnectionFactory::new(addr.to_string()), config).await?;
    println!("1. Warm pool: {} idle connections", pool.idle_count());

    {
        let mut conn = pool.acquire().await?;
        conn.write(b"hello").await?;
        let mut buf = [0u8; 5];
        let n = conn.read(&mut buf).await?;
        println!(
            "2. Connection {} echoed: {}",
            conn.id(),
            String::from_utf8_lossy(&buf[..n])
        );
        println!("   Idle while checked out: {}", pool.idle_count());
    }

    println!("3. Idle after return: {}", pool.idle_count());

    let health = pool.get_health_status();
    println!("4. Healthy: {} (warnings: {:?})", health.is_healthy(), health.warnings);

    pool.close();
    println!("5. Closed, idle: {}", pool.idle_count());
    Ok(())
}
