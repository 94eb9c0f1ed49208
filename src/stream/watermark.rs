use crate::config::WatermarkConfig;
use crate::media::MediaGenerator;
use crate::task::{TaskHandle, best_effort_text};
use std::sync::Arc;
use tracing::debug;

/// Speculative jobs fired by one text-growth notification.
#[derive(Debug, Default)]
pub struct FiredJobs {
    pub image_prompt: Option<TaskHandle<Option<String>>>,
    pub ambience: Option<TaskHandle<Option<String>>>,
}

impl FiredJobs {
    pub fn is_empty(&self) -> bool {
        self.image_prompt.is_none() && self.ambience.is_none()
    }
}

/// Launches speculative media jobs once the narration is long enough.
///
/// Each watermark fires at most once per narration. Jobs receive their own
/// copy of the text seen at fire time and never touch the session.
pub struct WatermarkScheduler {
    image_prompt_chars: usize,
    ambience_chars: usize,
    image_prompt: Arc<dyn MediaGenerator>,
    ambience: Arc<dyn MediaGenerator>,
    image_prompt_fired: bool,
    ambience_fired: bool,
}

impl WatermarkScheduler {
    pub fn new(
        config: &WatermarkConfig,
        image_prompt: Arc<dyn MediaGenerator>,
        ambience: Arc<dyn MediaGenerator>,
    ) -> Self {
        Self {
            image_prompt_chars: config.image_prompt_chars,
            ambience_chars: config.ambience_chars,
            image_prompt,
            ambience,
            image_prompt_fired: false,
            ambience_fired: false,
        }
    }

    pub fn image_prompt_fired(&self) -> bool {
        self.image_prompt_fired
    }

    pub fn ambience_fired(&self) -> bool {
        self.ambience_fired
    }

    /// Called after every chunk with the full accumulated text.
    pub fn on_text_growth(&mut self, accumulated: &str) -> FiredJobs {
        let mut fired = FiredJobs::default();
        if self.image_prompt_fired && self.ambience_fired {
            return fired;
        }
        let chars = accumulated.chars().count();

        if !self.image_prompt_fired && chars >= self.image_prompt_chars {
            self.image_prompt_fired = true;
            debug!(chars, "image-prompt watermark reached");
            fired.image_prompt = Some(spawn_job(
                "image-prompt",
                self.image_prompt.clone(),
                accumulated,
            ));
        }

        if !self.ambience_fired && chars >= self.ambience_chars {
            self.ambience_fired = true;
            debug!(chars, "ambience watermark reached");
            fired.ambience = Some(spawn_job("ambience", self.ambience.clone(), accumulated));
        }

        fired
    }
}

/// Spawn a best-effort media job on a snapshot of `context`.
pub fn spawn_job(
    label: &'static str,
    generator: Arc<dyn MediaGenerator>,
    context: &str,
) -> TaskHandle<Option<String>> {
    let context = context.to_string();
    TaskHandle::spawn(label, async move {
        best_effort_text(label, generator.generate(&context)).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TemplateMedia;

    fn scheduler(
        image_prompt: Arc<TemplateMedia>,
        ambience: Arc<TemplateMedia>,
    ) -> WatermarkScheduler {
        WatermarkScheduler::new(&WatermarkConfig::default(), image_prompt, ambience)
    }

    #[tokio::test]
    async fn test_each_watermark_fires_once() {
        let image_prompt = Arc::new(TemplateMedia::image_prompt());
        let ambience = Arc::new(TemplateMedia::ambience());
        let mut scheduler = scheduler(image_prompt.clone(), ambience.clone());

        let mut text = String::new();
        let mut image_jobs = Vec::new();
        let mut ambience_jobs = Vec::new();
        for _ in 0..30 {
            text.push_str("Wind moves. ");
            let fired = scheduler.on_text_growth(&text);
            image_jobs.extend(fired.image_prompt);
            ambience_jobs.extend(fired.ambience);
        }

        assert_eq!(image_jobs.len(), 1);
        assert_eq!(ambience_jobs.len(), 1);
        assert!(scheduler.image_prompt_fired());
        assert!(scheduler.ambience_fired());

        for job in image_jobs.into_iter().chain(ambience_jobs) {
            assert!(job.join().await.unwrap().is_some());
        }
        assert_eq!(image_prompt.calls(), 1);
        assert_eq!(ambience.calls(), 1);
    }

    #[tokio::test]
    async fn test_thresholds_are_separate() {
        let mut scheduler = scheduler(
            Arc::new(TemplateMedia::image_prompt()),
            Arc::new(TemplateMedia::ambience()),
        );

        assert!(scheduler.on_text_growth(&"a".repeat(149)).is_empty());

        let fired = scheduler.on_text_growth(&"a".repeat(150));
        assert!(fired.image_prompt.is_some());
        assert!(fired.ambience.is_none());

        let fired = scheduler.on_text_growth(&"a".repeat(200));
        assert!(fired.image_prompt.is_none());
        assert!(fired.ambience.is_some());
    }

    #[tokio::test]
    async fn test_spent_scheduler_ignores_growth() {
        let image_prompt = Arc::new(TemplateMedia::image_prompt());
        let ambience = Arc::new(TemplateMedia::ambience());
        let mut scheduler = scheduler(image_prompt.clone(), ambience.clone());

        let fired = scheduler.on_text_growth(&"a".repeat(200));
        assert!(fired.image_prompt.is_some() && fired.ambience.is_some());

        let long = "b".repeat(100_000);
        for _ in 0..100 {
            assert!(scheduler.on_text_growth(&long).is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_job_yields_none() {
        let mut scheduler = scheduler(
            Arc::new(TemplateMedia::image_prompt().with_failure()),
            Arc::new(TemplateMedia::ambience().with_empty_output()),
        );
        let fired = scheduler.on_text_growth(&"b".repeat(500));

        let image_prompt = fired.image_prompt.unwrap().join().await.unwrap();
        let ambience = fired.ambience.unwrap().join().await.unwrap();
        assert_eq!(image_prompt, None);
        assert_eq!(ambience, None);
    }
}
