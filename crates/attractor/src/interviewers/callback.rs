//! Delegates question answering to a caller-supplied async closure —
//! useful for wiring a pipeline run into an external chat surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::interviewer::{Answer, Interviewer, Question};

type CallbackFn = dyn Fn(&Question) -> Pin<Box<dyn Future<Output = Answer> + Send>> + Send + Sync;

pub struct CallbackInterviewer {
    callback: Arc<CallbackFn>,
}

impl std::fmt::Debug for CallbackInterviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackInterviewer").finish_non_exhaustive()
    }
}

impl CallbackInterviewer {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(&Question) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Answer> + Send + 'static,
    {
        Self { callback: Arc::new(move |question| Box::pin(callback(question))) }
    }
}

#[async_trait]
impl Interviewer for CallbackInterviewer {
    async fn ask(&self, question: &Question) -> Answer {
        (self.callback)(question).await
    }
}
