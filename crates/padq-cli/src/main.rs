use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use padq_core::{
    CancellationToken, DType, PaddingFifoQueue, PartialShape, Queue, QueueError, QueueSpec, Tensor,
    Tuple,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Duration, sleep};

const PRODUCERS: usize = 3;
const TUPLES_PER_PRODUCER: usize = 6;
const BATCH_SIZE: usize = 4;
const MAX_FREE_DIM: usize = 5;
const BATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Ragged i32 sequences paired with a scalar f32 score.
fn default_spec() -> QueueSpec {
    QueueSpec::new(
        8,
        vec![DType::I32, DType::F32],
        vec![PartialShape::new(vec![None]), PartialShape::scalar()],
    )
    .with_name("demo")
}

fn load_spec() -> Result<QueueSpec, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(QueueSpec::from_json(&json)?)
        }
        None => Ok(default_spec()),
    }
}

fn random_tensor(rng: &mut StdRng, dtype: DType, shape: &[usize]) -> Tensor {
    let dim = IxDyn(shape);
    match dtype {
        DType::Bool => ArrayD::from_shape_fn(dim, |_| rng.gen_bool(0.5)).into(),
        DType::U8 => ArrayD::from_shape_fn(dim, |_| rng.gen_range(1..=255u8)).into(),
        DType::I32 => ArrayD::from_shape_fn(dim, |_| rng.gen_range(1..100i32)).into(),
        DType::I64 => ArrayD::from_shape_fn(dim, |_| rng.gen_range(1..100i64)).into(),
        DType::F32 => ArrayD::from_shape_fn(dim, |_| rng.gen_range(0.0..1.0f32)).into(),
        DType::F64 => ArrayD::from_shape_fn(dim, |_| rng.gen_range(0.0..1.0f64)).into(),
    }
}

/// A tuple that fits `spec`, with free dimensions drawn at random.
fn random_tuple(rng: &mut StdRng, spec: &QueueSpec) -> Tuple {
    spec.dtypes
        .iter()
        .zip(&spec.shapes)
        .map(|(&dtype, declared)| {
            let shape: Vec<usize> = declared
                .dims()
                .iter()
                .map(|d| d.unwrap_or_else(|| rng.gen_range(1..=MAX_FREE_DIM)))
                .collect();
            random_tensor(rng, dtype, &shape)
        })
        .collect()
}

fn describe(tensor: &Tensor) -> String {
    match tensor {
        Tensor::Bool(a) => format!("{a}"),
        Tensor::U8(a) => format!("{a}"),
        Tensor::I32(a) => format!("{a}"),
        Tensor::I64(a) => format!("{a}"),
        Tensor::F32(a) => format!("{a:.3}"),
        Tensor::F64(a) => format!("{a:.3}"),
    }
}

fn print_batch(label: &str, tuple: &Tuple) {
    println!("{label}:");
    for (i, component) in tuple.iter().enumerate() {
        println!(
            "  component {i} ({}, shape={:?}):\n{}",
            component.dtype(),
            component.shape(),
            describe(component)
        );
    }
}

/// producer: push random tuples, then report how many were admitted.
async fn producer(id: usize, queue: Arc<PaddingFifoQueue>) -> Result<usize, QueueError> {
    let mut rng = StdRng::from_entropy();
    let cancel = CancellationToken::new();
    for n in 0..TUPLES_PER_PRODUCER {
        let tuple = random_tuple(&mut rng, queue.spec());
        queue.enqueue(tuple, &cancel).await?;
        tracing::debug!(producer = id, n, "enqueued");
        sleep(Duration::from_millis(rng.gen_range(1..20))).await;
    }
    Ok(TUPLES_PER_PRODUCER)
}

/// Wait for one batch, giving up after `BATCH_TIMEOUT` by cancelling our own token.
async fn next_batch(queue: &PaddingFifoQueue) -> Result<Tuple, QueueError> {
    let cancel = CancellationToken::new();
    let timer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            sleep(BATCH_TIMEOUT).await;
            cancel.cancel();
        }
    });
    let result = queue.dequeue_many(BATCH_SIZE, &cancel).await;
    timer.abort();
    result
}

/// consumer: take padded batches until the queue is closed and short, then
/// drain the remainder one tuple at a time.
async fn consumer(queue: Arc<PaddingFifoQueue>) -> Result<usize, QueueError> {
    let mut received = 0;
    let mut batches = 0;
    loop {
        match next_batch(&queue).await {
            Ok(batch) => {
                batches += 1;
                received += BATCH_SIZE;
                print_batch(&format!("batch {batches}"), &batch);
            }
            Err(QueueError::OutOfRange(reason)) => {
                tracing::info!(%reason, "queue closed, draining remainder");
                break;
            }
            Err(QueueError::Cancelled(reason)) => {
                tracing::warn!(%reason, "no batch within timeout, retrying");
            }
            Err(err) => return Err(err),
        }
    }

    let cancel = CancellationToken::new();
    loop {
        match queue.dequeue(&cancel).await {
            Ok(tuple) => {
                received += 1;
                print_batch("leftover", &tuple);
            }
            Err(QueueError::OutOfRange(_)) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(received)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // (A) queue from spec
    let spec = load_spec()?;
    let queue = Arc::new(PaddingFifoQueue::new(spec)?);
    tracing::info!(queue = queue.name(), capacity = queue.spec().capacity, "queue ready");

    // (B) one consumer, several producers
    let consumer = tokio::spawn(consumer(Arc::clone(&queue)));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|id| tokio::spawn(producer(id, Arc::clone(&queue))))
        .collect();

    let mut produced = 0;
    for handle in producers {
        produced += handle.await??;
    }

    // (C) close once every producer is done; the consumer drains what is left
    queue.close(false).await?;
    let consumed = consumer.await??;

    println!("produced={produced} consumed={consumed}");
    println!("stats: {}", serde_json::to_string(&queue.stats())?);
    Ok(())
}
