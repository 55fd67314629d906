#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use mailpush::{
    error::FetchError,
    events::{Cursor, Event, EventSource},
};
use parking_lot::Mutex;
use reqwest::StatusCode;

/// What the next fetch returns
#[derive(Debug, Clone)]
pub enum Step {
    Event(&'static str),
    /// Succeed only after sleeping, to keep the loop busy mid-fetch
    Delayed(Duration, &'static str),
    Fail,
}

#[derive(Debug, Default)]
struct State {
    steps: VecDeque<Step>,
    cursors: Vec<Cursor>,
    sources: usize,
    fetched_by: HashSet<usize>,
}

/// Shared script consumed by every [`ScriptedSource`] created from it
///
/// Once the steps run out every fetch fails.
#[derive(Debug, Clone, Default)]
pub struct Script {
    state: Arc<Mutex<State>>,
}

impl Script {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let script = Self::default();
        script.state.lock().steps.extend(steps);
        script
    }

    /// A new source reading from this script
    pub fn source(&self) -> ScriptedSource {
        let mut state = self.state.lock();
        state.sources += 1;

        ScriptedSource {
            id: state.sources,
            script: self.clone(),
        }
    }

    pub fn push(&self, step: Step) {
        self.state.lock().steps.push_back(step);
    }

    /// Cursors passed to each fetch so far, in order
    pub fn cursors(&self) -> Vec<Cursor> {
        self.state.lock().cursors.clone()
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().cursors.len()
    }

    /// How many distinct sources have been polled
    pub fn polled_sources(&self) -> usize {
        self.state.lock().fetched_by.len()
    }
}

#[derive(Debug)]
pub struct ScriptedSource {
    id: usize,
    script: Script,
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch_next(&mut self, cursor: &Cursor) -> Result<Event, FetchError> {
        let step = {
            let mut state = self.script.state.lock();
            state.cursors.push(cursor.clone());
            state.fetched_by.insert(self.id);
            state.steps.pop_front()
        };

        match step {
            Some(Step::Event(id)) => Ok(Event::empty(id)),
            Some(Step::Delayed(delay, id)) => {
                tokio::time::sleep(delay).await;
                Ok(Event::empty(id))
            }
            Some(Step::Fail) | None => Err(FetchError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "scripted failure".to_string(),
            }),
        }
    }
}
