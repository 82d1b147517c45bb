use crossbeam_channel::unbounded;

/// Apply `f` to every item on at most `max_workers` threads.
///
/// Results come back in submission order regardless of completion order.
/// Every item runs to completion; nothing is cancelled when one of them
/// produces an error value.
pub fn parallel_map<T, R, F>(items: Vec<T>, max_workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = items.len();
    let workers = max_workers.clamp(1, total.max(1));
    if total <= 1 || workers == 1 {
        return items.into_iter().map(f).collect();
    }

    let (job_tx, job_rx) = unbounded::<(usize, T)>();
    for job in items.into_iter().enumerate() {
        // The receiver is alive until the scope below ends.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let (result_tx, result_rx) = unbounded::<(usize, R)>();
    let f = &f;
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            scope.spawn(move || {
                for (index, item) in jobs.iter() {
                    let _ = results.send((index, f(item)));
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    for (index, result) in result_rx.try_iter() {
        slots[index] = Some(result);
    }
    slots.into_iter().flatten().collect()
}
