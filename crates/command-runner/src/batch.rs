//! Collective waiting over sets of process handles
//!
//! The polling functions only ever ask each handle for its current
//! [`state`](ProcessHandle::state), which never blocks, and sleep between
//! rounds. A slow process therefore never stalls the loop, and a finished
//! handle is noticed at most one interval after its invocation ended.
//!
//! Every handle passed in must already be started: a handle that is
//! [`NotStarted`](crate::ExecutionState::NotStarted) never finishes.

use std::thread;
use std::time::Duration;

use crate::handle::{Completion, ProcessHandle};

/// Poll `handles` every `interval` until all of them are finished
///
/// `on_complete` is called exactly once per handle, in the round its
/// finish is observed; handles finishing in the same round are reported in
/// input order.
pub fn wait_for_all(
    handles: &[ProcessHandle],
    interval: Duration,
    mut on_complete: Option<&mut dyn FnMut(&ProcessHandle)>,
) {
    let mut pending: Vec<usize> = (0..handles.len()).collect();

    loop {
        pending.retain(|&i| {
            if !handles[i].state().is_terminal() {
                return true;
            }
            if let Some(callback) = on_complete.as_mut() {
                callback(&handles[i]);
            }
            false
        });

        if pending.is_empty() {
            break;
        }
        thread::sleep(interval);
    }
}

/// Poll `handles` every `interval`, letting `replace` start new handles as
/// old ones finish
///
/// `replace` is called once per finished handle and may return any number
/// of already-started handles; those join the polling set. Returns every
/// handle seen, originals first and replacements in the order they were
/// added, once none is left running.
pub fn wait_and_replace<F, R>(
    handles: Vec<ProcessHandle>,
    interval: Duration,
    mut replace: F,
) -> Vec<ProcessHandle>
where
    F: FnMut(&ProcessHandle) -> R,
    R: IntoIterator<Item = ProcessHandle>,
{
    let mut all = handles;
    let mut pending: Vec<usize> = (0..all.len()).collect();

    while !pending.is_empty() {
        let (finished, running): (Vec<usize>, Vec<usize>) = pending
            .into_iter()
            .partition(|&i| all[i].state().is_terminal());
        pending = running;

        for i in finished {
            for replacement in replace(&all[i]) {
                pending.push(all.len());
                all.push(replacement);
            }
        }

        if !pending.is_empty() {
            thread::sleep(interval);
        }
    }

    all
}

/// Run `jobs` with at most `limit` handles in flight at once
///
/// `start` turns a job into a started handle. The first `limit` jobs are
/// started up front; after that, one job is started for every handle that
/// finishes. Returns all dispatched handles, finished.
pub fn run_bounded<J, F>(
    jobs: J,
    limit: usize,
    interval: Duration,
    mut start: F,
) -> Vec<ProcessHandle>
where
    J: IntoIterator,
    F: FnMut(J::Item) -> ProcessHandle,
{
    let mut jobs = jobs.into_iter();
    let initial: Vec<ProcessHandle> = jobs
        .by_ref()
        .take(limit.max(1))
        .map(&mut start)
        .collect();

    wait_and_replace(initial, interval, |_| jobs.next().map(&mut start))
}

/// Wait for every handle without polling
///
/// Awaits each handle's completion notification instead of sleeping
/// between state checks. On return every started handle is finished.
pub async fn wait_for_all_async(handles: &[ProcessHandle]) {
    let completions = handles
        .iter()
        .filter_map(ProcessHandle::completion)
        .map(Completion::wait);
    futures::future::join_all(completions).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionState, SpawnOptions};

    fn started(command: &str, args: &[&str]) -> ProcessHandle {
        let mut handle = ProcessHandle::new();
        handle
            .exec_async(command, args.iter().copied(), SpawnOptions::default())
            .unwrap();
        handle
    }

    #[test]
    fn test_wait_for_all_empty() {
        wait_for_all(&[], Duration::from_millis(10), None);
        let all = wait_and_replace(Vec::new(), Duration::from_millis(10), |_| {
            None::<ProcessHandle>
        });
        assert!(all.is_empty());
    }

    #[test]
    fn test_same_round_reports_in_input_order() {
        let handles = vec![
            started("true", &[]),
            started("false", &[]),
            started("pinggg", &[]),
        ];
        // Let everything finish before the first round.
        futures::executor::block_on(wait_for_all_async(&handles));

        let mut order = Vec::new();
        let mut record = |h: &ProcessHandle| order.push(h.state());
        wait_for_all(&handles, Duration::from_millis(10), Some(&mut record));

        assert_eq!(
            order,
            vec![
                ExecutionState::Completed,
                ExecutionState::Completed,
                ExecutionState::FailedToStart,
            ]
        );
    }

    #[test]
    fn test_replacements_are_waited_on() {
        let mut budget = 2;
        let all = wait_and_replace(
            vec![started("true", &[])],
            Duration::from_millis(10),
            |_| {
                if budget == 0 {
                    return Vec::new();
                }
                budget -= 1;
                vec![started("sleep", &["0.05"]), started("true", &[])]
            },
        );

        // 1 original, then each of the first 2 finishers adds 2.
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|h| h.state().is_terminal()));
    }
}
