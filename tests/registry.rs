extern crate threaded_sort;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use threaded_sort::prelude::*;
use threaded_sort::task::{CollectErrors, Job};

fn init() {
    let _ = env_logger::try_init();
}

fn pool(num_threads: usize) -> Arc<ThreadPool> {
    let params = PoolParams {
        num_threads,
        stack_size: None,
    };

    Arc::new(ThreadPool::new(&params).unwrap())
}

/// Waits for all tasks of `registry` on another thread, so a lost completion
/// fails the test instead of hanging it.
fn wait_or_deadlock(registry: &Arc<Registry>) -> usize {
    let (tx, rx) = mpsc::channel();

    {
        let registry = registry.clone();
        thread::spawn(move || {
            registry.wait_for_all_tasks_completion();
            tx.send(registry.active_count()).unwrap();
        });
    }

    rx.recv_timeout(Duration::from_secs(10))
        .expect("deadlock found!")
}

/// Blocks until the tasks have released their references to `registry`, so the
/// caller holds the last one.
fn released_by_tasks(registry: &Arc<Registry>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Arc::strong_count(registry) > 1 {
        assert!(Instant::now() < deadline, "tasks never released the registry");
        thread::sleep(Duration::from_millis(1));
    }
}

/// A thread pool which reports once it has been dropped and terminated.
struct ObservedPool {
    pool: ThreadPool,
    dropped: Mutex<mpsc::Sender<()>>,
}

impl Launcher for ObservedPool {
    fn launch(&self, job: Job) -> Result<ExecHandle> {
        self.pool.launch(job)
    }
}

impl Drop for ObservedPool {
    fn drop(&mut self) {
        self.pool.terminate();
        let _ = self.dropped.lock().unwrap().send(());
    }
}

/// Spawns a thread per task, and panics on that thread after the task is done.
struct PanicsAfterJob(ThreadLauncher);

impl Launcher for PanicsAfterJob {
    fn launch(&self, job: Job) -> Result<ExecHandle> {
        self.0.launch(Box::new(move || {
            job();
            panic!("lost after report");
        }))
    }
}

struct Tree {
    depth: usize,
    visits: Arc<AtomicUsize>,
}

impl TaskBody for Tree {
    fn run_body(&self, ctx: &TaskContext) -> Result<()> {
        self.visits.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));

        if self.depth > 0 {
            for _ in 0..2 {
                ctx.spawn(Tree {
                    depth: self.depth - 1,
                    visits: self.visits.clone(),
                })?;
            }
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("tree {}", self.depth)
    }
}

#[test]
fn first_error_wins() {
    init();

    let registry = Registry::new(Arc::new(ThreadLauncher::new(None)));
    let a = Task::new(&registry, body_fn(|_| Ok(())));
    let b = Task::new(&registry, body_fn(|_| Ok(())));
    let c = Task::new(&registry, body_fn(|_| Ok(())));
    registry.add_task(&a).unwrap();
    registry.add_task(&b).unwrap();
    registry.add_task(&c).unwrap();

    registry.handle_task_completion(a.id(), None);
    assert!(!registry.is_error_occurred());

    registry.handle_task_completion(c.id(), Some(Error::Failed("c".into())));
    registry.handle_task_completion(b.id(), Some(Error::Failed("b".into())));

    assert_eq!(registry.get_error(), Some(Error::Failed("c".into())));
    assert_eq!(registry.errors(), vec![Error::Failed("c".into())]);
}

#[test]
fn racing_errors() {
    init();

    let registry = Registry::with_policy(
        Arc::new(ThreadLauncher::new(None)),
        Box::new(CollectErrors::default()),
    );

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["left", "right"]
        .iter()
        .map(|name| {
            let task = Task::new(&registry, body_fn(|_| Ok(())));
            registry.add_task(&task).unwrap();

            let registry = registry.clone();
            let barrier = barrier.clone();
            let err = Error::Failed((*name).to_owned());
            thread::spawn(move || {
                barrier.wait();
                registry.handle_task_completion(task.id(), Some(err));
            })
        })
        .collect();

    for v in handles {
        v.join().unwrap();
    }

    let errors = registry.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(registry.get_error().as_ref(), errors.first());
    assert!(registry.are_all_tasks_completed());
}

#[test]
fn staggered_threads() {
    init();

    let launcher = Arc::new(ThreadLauncher::new(None));
    let registry = Registry::new(launcher.clone());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let task = Task::new(
                &registry,
                body_fn(move |_| {
                    thread::sleep(Duration::from_millis(i * 3));
                    Ok(())
                }),
            );

            registry.add_task(&task).unwrap();
            task.start(&registry);
            task
        })
        .collect();

    assert_eq!(wait_or_deadlock(&registry), 0);
    assert!(!registry.is_error_occurred());
    assert_eq!(launcher.spawned(), 16);

    for task in &tasks {
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(!task.is_failed());
    }

    let pending = registry.finished_count();
    assert_eq!(registry.reclaim_all(), pending);
    assert_eq!(registry.reclaimed_count(), 16);
    assert_eq!(registry.finished_count(), 0);
}

#[test]
fn staggered_pool() {
    init();

    let registry = Registry::new(pool(3));

    for i in 0..32 {
        let task = Task::new(
            &registry,
            body_fn(move |_| {
                thread::sleep(Duration::from_millis(i % 5));
                Ok(())
            }),
        );

        registry.add_task(&task).unwrap();
        task.start(&registry);
    }

    assert_eq!(wait_or_deadlock(&registry), 0);
    registry.reclaim_all();
    assert_eq!(registry.registered_count(), 32);
    assert_eq!(registry.reclaimed_count(), 32);
}

#[test]
fn transitive_spawns() {
    init();

    let visits = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new(pool(2));
    let root = Task::new(
        &registry,
        Tree {
            depth: 4,
            visits: visits.clone(),
        },
    );

    registry.add_task(&root).unwrap();
    root.start(&registry);

    assert_eq!(wait_or_deadlock(&registry), 0);
    assert_eq!(visits.load(Ordering::SeqCst), 31);
    assert_eq!(registry.registered_count(), 31);
    assert!(registry.get_error().is_none());
}

#[test]
fn synthetic_resource_error() {
    init();

    let registry = Registry::new(Arc::new(ThreadLauncher::new(None)));
    let ok = Task::new(&registry, body_fn(|_| Ok(())));
    let bad = Task::new(&registry, body_fn(|_| Err(Error::Alloc("synthetic"))));

    for task in &[&ok, &bad] {
        registry.add_task(task).unwrap();
        task.start(&registry);
    }

    assert_eq!(wait_or_deadlock(&registry), 0);
    assert_eq!(registry.get_error(), Some(Error::Alloc("synthetic")));
    assert_eq!(bad.error(), Some(Error::Alloc("synthetic")));
    assert!(ok.error().is_none());
}

#[test]
fn panics_are_reported() {
    init();

    let registry = Registry::new(pool(1));
    let task = Task::new(&registry, body_fn(|_| panic!("broken body")));
    let id = task.id();

    registry.add_task(&task).unwrap();
    task.start(&registry);

    assert_eq!(wait_or_deadlock(&registry), 0);
    assert_eq!(registry.get_error(), Some(Error::Panic(id, "broken body".into())));
}

#[test]
fn wait_timeout() {
    init();

    let registry = Registry::new(Arc::new(ThreadLauncher::new(None)));
    let task = Task::new(
        &registry,
        body_fn(|_| {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        }),
    );

    registry.add_task(&task).unwrap();
    task.start(&registry);

    assert!(!registry.wait_for_all_tasks_completion_timeout(Duration::from_millis(10)));
    assert_eq!(task.status(), TaskStatus::Started);
    assert!(registry.wait_for_all_tasks_completion_timeout(Duration::from_secs(10)));
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[test]
#[should_panic(expected = "is not active")]
fn double_report() {
    init();

    let registry = Registry::new(Arc::new(ThreadLauncher::new(None)));
    let task = Task::new(&registry, body_fn(|_| Ok(())));
    registry.add_task(&task).unwrap();

    registry.handle_task_completion(task.id(), None);
    registry.handle_task_completion(task.id(), None);
}

#[test]
fn unique_ids() {
    init();

    let registry = Registry::new(Arc::new(ThreadLauncher::new(None)));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                let ids: Vec<_> = (0..100)
                    .map(|_| Task::new(&registry, body_fn(|_| Ok(()))).id())
                    .collect();

                assert!(ids.windows(2).all(|w| w[0] < w[1]));
                ids
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for v in handles {
        ids.extend(v.join().unwrap());
    }

    assert_eq!(ids.len(), 800);

    // Identities are scoped to their registry.
    let other = Registry::new(Arc::new(ThreadLauncher::new(None)));
    assert_eq!(other.next_task_id(), TaskId::new(0));
}

#[test]
fn teardown_reclaims_threads() {
    init();

    let launcher = Arc::new(ThreadLauncher::new(None));
    let registry = Registry::new(launcher.clone());

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let task = Task::new(
                &registry,
                body_fn(move |_| {
                    thread::sleep(Duration::from_millis(i * 5));
                    Ok(())
                }),
            );

            registry.add_task(&task).unwrap();
            task.start(&registry);
            task
        })
        .collect();

    assert_eq!(wait_or_deadlock(&registry), 0);
    released_by_tasks(&registry);

    // Nothing reports after the last task, so its context is still pending.
    assert!(registry.finished_count() >= 1);
    drop(registry);

    assert_eq!(launcher.spawned(), 4);
    for task in &tasks {
        assert!(task.is_reclaimed());
    }
}

#[test]
fn teardown_reclaims_pooled() {
    init();

    let pool = pool(2);
    let registry = Registry::new(pool.clone());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let task = Task::new(
                &registry,
                body_fn(move |_| {
                    thread::sleep(Duration::from_millis(i % 3));
                    Ok(())
                }),
            );

            registry.add_task(&task).unwrap();
            task.start(&registry);
            task
        })
        .collect();

    assert_eq!(wait_or_deadlock(&registry), 0);
    released_by_tasks(&registry);
    assert!(registry.finished_count() >= 1);
    drop(registry);

    for task in &tasks {
        assert!(task.is_reclaimed());
    }

    // The workers are still serving.
    let handle = pool.spawn(|| {}).unwrap();
    assert!(handle.wait_timeout(Duration::from_secs(5)));
}

#[test]
fn dropped_while_running() {
    init();

    let (tx, rx) = mpsc::channel();
    let launcher = ObservedPool {
        pool: ThreadPool::new(&PoolParams {
            num_threads: 2,
            stack_size: None,
        })
        .unwrap(),
        dropped: Mutex::new(tx),
    };

    let registry = Registry::new(Arc::new(launcher));
    let task = Task::new(
        &registry,
        body_fn(|_| {
            thread::sleep(Duration::from_millis(100));
            Ok(())
        }),
    );

    registry.add_task(&task).unwrap();
    task.start(&registry);

    // The running task holds the last reference to the registry, and through it
    // to the pool, which is then torn down on one of its own workers.
    drop(registry);
    drop(task);

    rx.recv_timeout(Duration::from_secs(5))
        .expect("deadlock found!");
}

#[test]
fn join_failure_is_recorded() {
    init();

    let registry = Registry::with_policy(
        Arc::new(PanicsAfterJob(ThreadLauncher::new(None))),
        Box::new(CollectErrors::default()),
    );

    let task = Task::new(&registry, body_fn(|_| Ok(())));
    registry.add_task(&task).unwrap();
    task.start(&registry);
    assert_eq!(wait_or_deadlock(&registry), 0);
    assert!(!registry.is_error_occurred());

    // Later completions reclaim the context as soon as its thread is gone.
    let deadline = Instant::now() + Duration::from_secs(10);
    while registry.reclaimed_count() == 0 {
        assert!(Instant::now() < deadline, "context was never reclaimed");
        thread::sleep(Duration::from_millis(1));

        let other = Task::new(&registry, body_fn(|_| Ok(())));
        registry.add_task(&other).unwrap();
        registry.handle_task_completion(other.id(), None);
    }

    assert!(task.is_reclaimed());
    assert_eq!(
        registry.errors(),
        vec![Error::Join("lost after report".into())]
    );
}

