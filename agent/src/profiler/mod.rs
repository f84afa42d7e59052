//! Call-stack profiling of the target process
//!
//! The statistical profiler itself is an external component. The coordinator
//! only starts it against the target's pid, stops it once the target exits and
//! hands the resulting [`ProfileSession`] to the renderers.

pub mod external;
pub mod speedscope;

pub use external::ExternalProfiler;

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// Statistical call-stack profiler
pub trait StackProfiler {
    /// Begin sampling the process `pid`
    fn start(&mut self, pid: u32) -> Result<()>;

    /// Stop sampling and return everything collected since `start`
    fn stop(&mut self) -> impl Future<Output = Result<ProfileSession>>;
}

/// A frame of a sampled call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Frame {
    /// Display form, e.g. `train (model.py:42)`
    pub fn label(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{} ({}:{})", self.name, file, line),
            (Some(file), None) => format!("{} ({})", self.name, file),
            _ => self.name.clone(),
        }
    }

    /// Frame of the interpreter launcher (`-c` code or `runpy`) rather than
    /// of the profiled script
    pub fn is_launcher(&self) -> bool {
        matches!(
            self.file.as_deref(),
            Some(file) if file == "<string>" || file == "<frozen runpy>" || file.ends_with("runpy.py")
        )
    }
}

/// One sampled call stack
#[derive(Debug, Clone, PartialEq)]
pub struct StackSample {
    /// Index into [`ProfileSession::threads`]
    pub thread: usize,

    /// Seconds since the thread's profile began
    pub offset_secs: f64,

    /// Wall-clock time this sample stands for
    pub weight_secs: f64,

    /// Indices into [`ProfileSession::frames`], outermost first
    pub stack: Vec<usize>,
}

/// Everything a profiler collected over one run
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSession {
    /// Program that was profiled
    pub program: String,

    /// Start time, seconds since UNIX epoch
    pub started_at: f64,

    /// Wall-clock duration of the session
    pub duration_secs: f64,

    /// Sampling interval the profiler ran with
    pub interval: Duration,

    /// Names of the sampled threads
    pub threads: Vec<String>,

    pub frames: Vec<Frame>,

    /// Samples ordered by thread, then time
    pub samples: Vec<StackSample>,
}

impl ProfileSession {
    /// A session without samples
    pub fn empty(program: impl Into<String>, interval: Duration) -> Self {
        Self {
            program: program.into(),
            started_at: perfstack_shared::utils::time::system_time_secs(),
            duration_secs: 0.0,
            interval,
            threads: Vec::new(),
            frames: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Remove launcher frames from the root of every stack
    pub fn drop_launcher_frames(&mut self) {
        let launcher: Vec<bool> = self.frames.iter().map(Frame::is_launcher).collect();
        for sample in &mut self.samples {
            let root = sample
                .stack
                .iter()
                .take_while(|&&i| launcher.get(i).copied().unwrap_or(false))
                .count();
            sample.stack.drain(..root);
        }
    }

    /// Folded stacks in time order, for a flame chart.
    ///
    /// Adjacent identical stacks are merged into one line; stacks are never
    /// reordered. The thread name becomes the root frame when more than one
    /// thread was sampled.
    pub fn folded_timeline(&self) -> Vec<String> {
        let prefix_thread = self.threads.len() > 1;
        let mut lines: Vec<String> = Vec::new();
        let mut current: Option<(String, u64)> = None;

        for sample in &self.samples {
            let mut parts: Vec<String> = Vec::with_capacity(sample.stack.len() + 1);
            if prefix_thread {
                let thread = self
                    .threads
                    .get(sample.thread)
                    .map(String::as_str)
                    .unwrap_or("thread");
                parts.push(sanitize_folded(thread));
            }
            parts.extend(
                sample
                    .stack
                    .iter()
                    .filter_map(|&i| self.frames.get(i))
                    .map(|frame| sanitize_folded(&frame.label())),
            );
            if parts.is_empty() {
                continue;
            }
            let key = parts.join(";");

            match current.as_mut() {
                Some((stack, count)) if *stack == key => *count += 1,
                _ => {
                    if let Some((stack, count)) = current.take() {
                        lines.push(format!("{} {}", stack, count));
                    }
                    current = Some((key, 1));
                }
            }
        }
        if let Some((stack, count)) = current {
            lines.push(format!("{} {}", stack, count));
        }

        lines
    }

    /// Aggregate samples into a call tree rooted at a synthetic node
    pub fn call_tree(&self) -> CallNode {
        let mut root = TreeBuilder::new(None);
        for sample in &self.samples {
            let weight = sample.weight_secs;
            root.total += weight;
            let mut node = &mut root;
            for &frame in &sample.stack {
                let pos = match node.children.iter().position(|c| c.frame == Some(frame)) {
                    Some(pos) => pos,
                    None => {
                        node.children.push(TreeBuilder::new(Some(frame)));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[pos];
                node.total += weight;
            }
            node.self_time += weight;
        }
        root.build(&self.frames, &self.program)
    }
}

/// A node of the aggregated call tree
#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    pub label: String,
    pub total_secs: f64,
    pub self_secs: f64,
    /// Children ordered by descending total time
    pub children: Vec<CallNode>,
}

struct TreeBuilder {
    frame: Option<usize>,
    total: f64,
    self_time: f64,
    children: Vec<TreeBuilder>,
}

impl TreeBuilder {
    fn new(frame: Option<usize>) -> Self {
        Self {
            frame,
            total: 0.0,
            self_time: 0.0,
            children: Vec::new(),
        }
    }

    fn build(self, frames: &[Frame], root_label: &str) -> CallNode {
        let label = match self.frame.and_then(|i| frames.get(i)) {
            Some(frame) => frame.label(),
            None => root_label.to_string(),
        };
        let mut children: Vec<CallNode> = self
            .children
            .into_iter()
            .map(|child| child.build(frames, root_label))
            .collect();
        children.sort_by(|a, b| b.total_secs.total_cmp(&a.total_secs));

        CallNode {
            label,
            total_secs: self.total,
            self_secs: self.self_time,
            children,
        }
    }
}

/// Folded-stack lines use `;` between frames and a trailing space before the count
fn sanitize_folded(name: &str) -> String {
    name.replace(';', ":").replace(['\n', '\r'], " ")
}

/// Profiler that records nothing, for runs without call-stack sampling
#[derive(Debug)]
pub struct NullProfiler {
    program: String,
    interval: Duration,
}

impl NullProfiler {
    pub fn new(program: impl Into<String>, interval: Duration) -> Self {
        Self {
            program: program.into(),
            interval,
        }
    }
}

impl StackProfiler for NullProfiler {
    fn start(&mut self, _pid: u32) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<ProfileSession> {
        Ok(ProfileSession::empty(self.program.clone(), self.interval))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn frame(name: &str, line: u32) -> Frame {
        Frame {
            name: name.to_string(),
            file: Some("job.py".to_string()),
            line: Some(line),
        }
    }

    /// main → load (x2), main → train → step (x3), main → load (x1)
    pub(crate) fn session() -> ProfileSession {
        let frames = vec![frame("main", 1), frame("load", 10), frame("train", 20), frame("step", 30)];
        let stacks: Vec<Vec<usize>> = vec![
            vec![0, 1],
            vec![0, 1],
            vec![0, 2, 3],
            vec![0, 2, 3],
            vec![0, 2, 3],
            vec![0, 1],
        ];
        let samples = stacks
            .into_iter()
            .enumerate()
            .map(|(i, stack)| StackSample {
                thread: 0,
                offset_secs: i as f64 * 0.01,
                weight_secs: 0.01,
                stack,
            })
            .collect();

        ProfileSession {
            program: "job.py".to_string(),
            started_at: 1_700_000_000.0,
            duration_secs: 0.06,
            interval: Duration::from_millis(10),
            threads: vec!["MainThread".to_string()],
            frames,
            samples,
        }
    }

    #[test]
    fn test_folded_timeline_merges_adjacent_only() {
        let lines = session().folded_timeline();
        assert_eq!(
            lines,
            vec![
                "main (job.py:1);load (job.py:10) 2",
                "main (job.py:1);train (job.py:20);step (job.py:30) 3",
                "main (job.py:1);load (job.py:10) 1",
            ]
        );
    }

    #[test]
    fn test_folded_timeline_prefixes_threads() {
        let mut session = session();
        session.threads.push("Worker".to_string());
        session.samples[5].thread = 1;

        let lines = session.folded_timeline();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("MainThread;main"));
        assert!(lines[2].starts_with("Worker;main"));
    }

    #[test]
    fn test_call_tree_totals() {
        let tree = session().call_tree();
        assert_eq!(tree.label, "job.py");
        assert!((tree.total_secs - 0.06).abs() < 1e-9);

        let main = &tree.children[0];
        assert_eq!(tree.children.len(), 1);
        assert_eq!(main.children.len(), 2);

        // Equal totals, so look the children up by label
        let train = main.children.iter().find(|c| c.label.starts_with("train")).unwrap();
        let load = main.children.iter().find(|c| c.label.starts_with("load")).unwrap();
        assert!((train.total_secs - 0.03).abs() < 1e-9);
        assert!((load.total_secs - 0.03).abs() < 1e-9);
        assert!((load.self_secs - 0.03).abs() < 1e-9);
        assert_eq!(train.self_secs, 0.0);
        assert!((train.children[0].self_secs - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_frame_label() {
        let bare = Frame {
            name: "<module>".to_string(),
            file: None,
            line: None,
        };
        assert_eq!(bare.label(), "<module>");
        assert_eq!(frame("f", 3).label(), "f (job.py:3)");
    }

    #[test]
    fn test_drop_launcher_frames() {
        let mut session = session();
        let launcher = |name: &str, file: &str| Frame {
            name: name.to_string(),
            file: Some(file.to_string()),
            line: Some(1),
        };
        session.frames.push(launcher("<module>", "<string>"));
        session.frames.push(launcher("run_path", "/usr/lib/python3.10/runpy.py"));
        session.frames.push(launcher("_run_code", "<frozen runpy>"));
        for sample in &mut session.samples {
            let mut stack = vec![4, 5, 6];
            stack.append(&mut sample.stack);
            sample.stack = stack;
        }

        session.drop_launcher_frames();
        assert_eq!(session.samples[0].stack, vec![0, 1]);
        assert_eq!(session.folded_timeline(), self::session().folded_timeline());
    }

    #[tokio::test]
    async fn test_null_profiler_returns_empty_session() {
        let mut profiler = NullProfiler::new("job.py", Duration::from_millis(1));
        profiler.start(1).unwrap();
        let session = profiler.stop().await.unwrap();
        assert!(session.is_empty());
        assert!(session.folded_timeline().is_empty());
    }
}
