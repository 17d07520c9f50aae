// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait and a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the text-based tracker.
pub mod text;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{ROOT, Tag};

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global tag
    fn unique_tag(&self) -> Tag;

    /// Register an entity so that its log level can be resolved.
    fn add_entity(&self, tag: Tag, entity_name: &str);

    /// Determine whether an event of the given level is enabled for an
    /// entity.
    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool;

    /// Track when an entity with the given tag is created.
    fn create(&self, created_by: Tag, created: Tag, name: &str);

    /// Track when an entity with the given tag is destroyed.
    fn destroy(&self, destroyed_by: Tag, destroyed: Tag);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Tag, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to the time specified in `ns`.
    fn time(&self, set_by: Tag, time_ns: f64);

    /// Flush any buffered output.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints all track events to `stdout`.
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let entity_manager = EntityManager::new(level);
    let stdout_writer = Box::new(io::BufWriter::new(io::stdout()));
    let tracker: Tracker = Arc::new(TextTracker::new(entity_manager, stdout_writer));
    tracker
}

/// Create a [`Tracker`] that suppresses all track events.
pub fn dev_null_tracker() -> Tracker {
    let tracker: Tracker = Arc::new(DevNullTracker {});
    tracker
}

/// The [`EntityManager`] is responsible for determining entity log enable
/// states.
///
/// The log level for an entity is resolved once, when the entity is added,
/// using a first-match list of regular expressions over the entity's full
/// hierarchical name.
///
/// This manager is also used to allocate unique [`Tag`] values.
pub struct EntityManager {
    /// Level of _log_ events to output when no filter matches.
    default_log_level: log::Level,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_log_level: Vec<(Regex, log::Level)>,

    /// Used to assign unique tags.
    unique_tag: AtomicU64,

    /// Resolved log level per registered entity tag.
    levels: Mutex<HashMap<u64, log::Level>>,
}

impl EntityManager {
    /// Constructor with the default [`log::Level`]
    #[must_use]
    pub fn new(default_log_level: log::Level) -> Self {
        Self {
            default_log_level,
            regex_to_log_level: Vec::new(),
            unique_tag: AtomicU64::new(ROOT.0 + 1),
            levels: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn unique_tag(&self) -> Tag {
        let tag = self.unique_tag.fetch_add(1, Ordering::SeqCst);
        Tag(tag)
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in self.regex_to_log_level.iter() {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_log_level
    }

    /// Add a log filter regular expression.
    ///
    /// The first pattern added has the highest priority.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spine_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_log_filter(".*mmu.*", log::Level::Trace);
    /// ```
    pub fn add_log_filter(&mut self, regex_str: &str, level: log::Level) {
        match Regex::new(regex_str) {
            Ok(regex) => self.regex_to_log_level.push((regex, level)),
            Err(e) => panic!("Failed to parse regex {regex_str}:\n{e}\n"),
        };
    }

    pub(crate) fn add_entity(&self, tag: Tag, entity_name: &str) {
        let level = self.log_level_for(entity_name);
        self.levels.lock().unwrap().insert(tag.0, level);
    }

    pub(crate) fn is_enabled(&self, tag: Tag, level: log::Level) -> bool {
        let resolved = self
            .levels
            .lock()
            .unwrap()
            .get(&tag.0)
            .copied()
            .unwrap_or(self.default_log_level);
        level <= resolved
    }
}
