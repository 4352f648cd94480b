use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use esox_connpool::{Connection, ConnectionFactory, Pool, PoolConfiguration};
use std::io;

struct NullConnection;

#[async_trait]
impl Connection for NullConnection {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct NullFactory;

#[async_trait]
impl ConnectionFactory for NullFactory {
    type Connection = NullConnection;

    async fn create(&self) -> io::Result<NullConnection> {
        Ok(NullConnection)
    }
}

fn acquire_release(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = PoolConfiguration::new()
        .with_max_capacity(16)
        .with_initial_idle(16);
    let pool = runtime.block_on(Pool::new(NullFactory, config)).unwrap();
    let pool = &pool;

    c.bench_function("acquire_release_warm", |b| {
        b.to_async(&runtime).iter(|| async move {
            let conn = pool.acquire().await.unwrap();
            pool.release(conn);
        })
    });
}

criterion_group!(benches, acquire_release);
criterion_main!(benches);
