//! Many tasks sharing a small pool

use esox_connpool::{Pool, PoolConfiguration, PoolError, TcpConnectionFactory};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== esox_connpool - Concurrent Example ===\n");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let mut accepted = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            accepted.push(stream);
        }
    });

    let config = PoolConfiguration::new()
        .with_max_capacity(4)
        .with_acquire_timeout(Duration::from_millis(150))
        .with_waiter_queue_limit(8);
    let pool = Pool::new(TcpConnectionFactory::new(addr.to_string()), config).await?;

    let mut handles = vec![];
    for i in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            match pool.acquire().await {
                Ok(conn) => {
                    println!("   Task {:2} got connection {}", i, conn.id());
                    sleep(Duration::from_millis(50)).await;
                }
                Err(PoolError::AcquireTimeout(after)) => {
                    println!("   Task {:2} timed out after {:?}", i, after)
                }
                Err(err) => println!("   Task {:2} failed: {}", i, err),
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }

    println!("\nFinal idle: {}", pool.idle_count());

    let mut tags = HashMap::new();
    tags.insert("backend".to_string(), "demo".to_string());
    println!("{}", pool.export_metrics_prometheus("demo_pool", Some(&tags)));

    pool.close();
    Ok(())
}
