use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;

use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use stocktaker_service::caches::{InventoryCaches, NamedCache};
use stocktaker_service::catalog::CatalogService;
use stocktaker_service::config::Config as StocktakerConfig;
use tokio::sync::Semaphore;

use crate::workloads::{WorkloadsConfig, process_payload};

/// How often cache gauges are sent while the stresstest runs.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub async fn perform_stresstest(
    service_config: StocktakerConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // start the catalog service
    let product_count = workloads.store.product_count();
    let store = Arc::new(workloads.store.build());
    let caches = Arc::new(InventoryCaches::from_config(&service_config.caches));
    let service = Arc::new(CatalogService::new(store, Arc::clone(&caches)));

    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .map(|workload| (workload.concurrency, Arc::new(workload.payload)))
        .collect();

    // warmup: run each workload once to make sure caches are warm
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|(_, payload)| {
            let service = Arc::clone(&service);
            let payload = Arc::clone(payload);
            tokio::spawn(async move { process_payload(&service, &payload, product_count).await })
        });

        let results = futures::future::join_all(futures).await;
        for result in results {
            if let Err(error) = result? {
                tracing::warn!(%error, "Warmup request failed");
            }
        }

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    let start = Instant::now();
    let deadline = tokio::time::Instant::from_std(start + duration);

    let reporter = {
        let caches = Arc::clone(&caches);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => caches.report_metrics(),
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
        })
    };

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (concurrency, payload) in workloads.into_iter() {
        let service = Arc::clone(&service);

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let errors = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let payload = Arc::clone(&payload);
                        let service = Arc::clone(&service);
                        let task_durations = Arc::clone(&task_durations);
                        let errors = Arc::clone(&errors);
                        let task_start = Instant::now();

                        let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                        let ctx = sentry::TransactionContext::new("stresstest", "stresstest");
                        let transaction = hub.start_transaction(ctx);

                        let future = async move {
                            if process_payload(&service, &payload, product_count).await.is_err() {
                                errors.fetch_add(1, Ordering::Relaxed);
                            }

                            transaction.finish();

                            task_durations
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        };
                        let future = future.bind_hub(hub);

                        tokio::spawn(future);
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations: DDSketch = {
                let mut task_durations = task_durations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *task_durations)
            };

            (concurrency, task_durations, errors.load(Ordering::Relaxed))
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;
    reporter.await?;
    caches.report_metrics();

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, task_durations, errors) = task?;

        let ops = task_durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!(
            "Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {errors} errors"
        );

        if let Some(sum) = task_durations.sum() {
            let avg = Duration::from_secs_f64(sum / ops as f64);
            let quantile = |q| {
                let value = task_durations.quantile(q).ok().flatten().unwrap_or_default();
                Duration::from_secs_f64(value)
            };
            let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
            println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }
    }
    println!();

    print_cache_stats(&caches.models);
    print_cache_stats(&caches.colors);
    print_cache_stats(&caches.dashboard);

    Ok(())
}

fn print_cache_stats<K, V>(cache: &NamedCache<K, V>)
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let stats = cache.cache().stats();
    let accesses = stats.accesses();
    let hit_ratio = if accesses > 0 {
        stats.hits as f64 / accesses as f64 * 100.0
    } else {
        0.0
    };
    println!(
        "Cache {} ({} entries): {accesses} accesses, {hit_ratio:.1}% hits, {} computations, {} joins, {} failures, {} discarded, {} timeouts",
        cache.name(),
        cache.cache().size(),
        stats.misses,
        stats.joins,
        stats.failures,
        stats.discarded,
        stats.timeouts,
    );
}
