use std::sync::Mutex;
use std::time::Duration;

use imagemill_engine::executor::CommandExecutor;
use imagemill_engine::{ExecError, Task, TaskRunner};
use mockall::mock;

mock! {
    Executor {}

    impl CommandExecutor for Executor {
        async fn exec(&self, program: &str, args: &[String]) -> Result<String, ExecError>;
        async fn exec_streaming(&self, program: &str, args: &[String]) -> Result<(), ExecError>;
    }
}

/// Sleeps for the task's declared duration and records concurrency.
///
/// Task arguments: `<id> <millis> [fail]`.
#[derive(Default)]
struct Recorder {
    state: Mutex<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    started: Vec<String>,
    finished: Vec<String>,
    running: usize,
    peak: usize,
}

impl Recorder {
    fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    fn finished(&self) -> Vec<String> {
        self.state.lock().unwrap().finished.clone()
    }

    fn peak(&self) -> usize {
        self.state.lock().unwrap().peak
    }
}

impl CommandExecutor for Recorder {
    async fn exec(&self, program: &str, args: &[String]) -> Result<String, ExecError> {
        let id = args[0].clone();
        {
            let mut state = self.state.lock().unwrap();
            state.started.push(id.clone());
            state.running += 1;
            state.peak = state.peak.max(state.running);
        }

        let millis: u64 = args[1].parse().unwrap();
        tokio::time::sleep(Duration::from_millis(millis)).await;

        {
            let mut state = self.state.lock().unwrap();
            state.running -= 1;
            state.finished.push(id.clone());
        }

        if args.get(2).is_some_and(|a| a == "fail") {
            return Err(ExecError::CommandFailed {
                command: format!("{program} {}", args.join(" ")),
                status: "exit status: 1".to_owned(),
                output: format!("task {id} failed"),
            });
        }
        Ok(String::new())
    }

    async fn exec_streaming(&self, program: &str, args: &[String]) -> Result<(), ExecError> {
        self.exec(program, args).await.map(drop)
    }
}

fn task(id: &str, millis: u64) -> Task {
    Task::builder("task")
        .args([id.to_owned(), millis.to_string()])
        .build()
        .unwrap()
}

fn failing(id: &str, millis: u64) -> Task {
    Task::builder("task")
        .args([id.to_owned(), millis.to_string(), "fail".to_owned()])
        .build()
        .unwrap()
}

fn runner(threads: usize, tasks: impl IntoIterator<Item = Task>) -> TaskRunner {
    let mut runner = TaskRunner::new();
    runner.set_threads(threads);
    for task in tasks {
        runner.add(task);
    }
    runner
}

// ── Concurrency Tests ──

#[tokio::test(start_paused = true)]
async fn first_error_cancels_pending_tasks_but_running_ones_finish() {
    let runner = runner(
        2,
        [
            task("1", 20),
            task("2", 100),
            failing("3", 0),
            task("4", 10),
            task("5", 10),
        ],
    );
    let recorder = Recorder::default();

    let outcome = runner.run_tracked(&recorder).await;

    let err = outcome.error.expect("task 3 should fail");
    assert!(
        matches!(&err, ExecError::CommandFailed { output, .. } if output == "task 3 failed"),
        "got: {err}"
    );
    assert!(recorder.peak() <= 2, "peak concurrency {}", recorder.peak());

    let mut started = recorder.started();
    started.sort();
    assert_eq!(started, vec!["1", "2", "3"]);

    // Task 2 was already running when task 3 failed
    assert!(recorder.finished().contains(&"2".to_owned()));
    let mut completed = outcome.completed.clone();
    completed.sort();
    assert_eq!(completed, vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn width_is_bounded_by_threads() {
    let runner = runner(3, (1..=9).map(|i| task(&i.to_string(), 10 * i)));
    let recorder = Recorder::default();

    runner.run(&recorder).await.unwrap();

    assert_eq!(recorder.peak(), 3);
    assert_eq!(recorder.finished().len(), 9);
}

#[tokio::test(start_paused = true)]
async fn width_is_bounded_by_task_count() {
    let runner = runner(16, [task("1", 10), task("2", 10)]);
    let recorder = Recorder::default();

    runner.run(&recorder).await.unwrap();
    assert_eq!(recorder.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn single_thread_keeps_queue_order() {
    let runner = runner(
        1,
        [task("1", 50), task("2", 1), task("3", 30), task("4", 0)],
    );
    let recorder = Recorder::default();

    runner.run(&recorder).await.unwrap();

    assert_eq!(recorder.started(), vec!["1", "2", "3", "4"]);
    assert_eq!(recorder.finished(), vec!["1", "2", "3", "4"]);
    assert_eq!(recorder.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn single_thread_stops_after_failure() {
    let runner = runner(1, [task("1", 5), failing("2", 5), task("3", 5)]);
    let recorder = Recorder::default();

    assert!(runner.run(&recorder).await.is_err());
    assert_eq!(recorder.started(), vec!["1", "2"]);
}

// ── Deadline Tests ──

#[tokio::test(start_paused = true)]
async fn elapsed_deadline_fails_the_task() {
    let mut runner = runner(2, [task("slow", 60_000), task("fast", 10), task("later", 10)]);
    runner.set_timeout(Some(Duration::from_secs(5)));
    let recorder = Recorder::default();

    let err = runner.run(&recorder).await.unwrap_err();

    assert!(
        matches!(&err, ExecError::TimedOut { command, after } if command == "task slow 60000" && *after == Duration::from_secs(5)),
        "got: {err}"
    );
    assert!(!recorder.finished().contains(&"slow".to_owned()));
}

// ── Queueing Tests ──

#[tokio::test]
async fn duplicate_commands_run_once() {
    let mut runner = TaskRunner::new();
    let tag = || {
        Task::builder("docker")
            .args(["tag", "app", "ghcr.io/acme/app:latest"])
            .build()
            .unwrap()
    };
    assert!(runner.add_unique(tag()));
    assert!(!runner.add_unique(tag()));
    assert_eq!(runner.len(), 1);

    let mut mock = MockExecutor::new();
    mock.expect_exec()
        .withf(|program, args| program == "docker" && args[0] == "tag")
        .times(1)
        .returning(|_, _| Ok(String::new()));

    runner.run(&mock).await.unwrap();
}

#[tokio::test]
async fn plain_add_keeps_duplicates() {
    let mut runner = TaskRunner::new();
    let rm = || Task::builder("docker").args(["rm", "-f", "x"]).build().unwrap();
    runner.add(rm());
    runner.add(rm());
    assert_eq!(runner.len(), 2);
}

#[tokio::test]
async fn dry_run_executes_nothing() {
    let mut runner = runner(4, [task("1", 10), failing("2", 10)]);
    runner.set_dry_run(true);

    // No expectations: any call would panic
    let mock = MockExecutor::new();
    let outcome = runner.run_tracked(&mock).await;

    assert!(outcome.error.is_none());
    assert_eq!(outcome.completed.len(), 2);
}

#[tokio::test]
async fn empty_runner_succeeds() {
    let mock = MockExecutor::new();
    TaskRunner::new().run(&mock).await.unwrap();
}

#[tokio::test]
async fn verbose_tasks_stream_output() {
    let mut runner = TaskRunner::new();
    runner.add(
        Task::builder("docker")
            .arg("version")
            .verbose(true)
            .build()
            .unwrap(),
    );

    let mut mock = MockExecutor::new();
    mock.expect_exec_streaming()
        .times(1)
        .returning(|_, _| Ok(()));
    mock.expect_exec().never();

    runner.run(&mock).await.unwrap();
}

#[test]
fn zero_threads_means_one() {
    let mut runner = TaskRunner::new();
    runner.set_threads(0);
    assert_eq!(runner.threads(), 1);
}
