use crate::capture::{CaptureError, ChromeCapturer, PageCapturer};
use crate::config::AppConfig;
use crate::copy::{CopyError, CopyGenerator, LlmCopyGenerator};
use crate::llm::{LlmClient, LlmConfig};
use crate::models::{IMAGE_SLOTS, ListingJob, RunReport, StageReport};
use crate::render::{RenderError, TemplateRenderer};
use crate::video::{CommandVideoAssembler, VideoAssembler, VideoError};
use serde::Serialize;
use serde_json::{Value, json};
use std::{future::Future, path::PathBuf, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

pub const DOCUMENT_FILE: &str = "generated-product-pages.html";
pub const IMAGES_DIR: &str = "images";
pub const VIDEO_FILE: &str = "product-video.mp4";

/// Runs one listing job end to end: copy, render, capture, video.
///
/// Stages run strictly in order and the first failure stops the job. Each
/// job works inside `<work_dir>/<job id>/`, so re-running a job overwrites
/// its own artifacts and nothing else.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    copy: Arc<dyn CopyGenerator>,
    renderer: Arc<TemplateRenderer>,
    capturer: Arc<dyn PageCapturer>,
    video: Arc<dyn VideoAssembler>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        copy: Arc<dyn CopyGenerator>,
        renderer: Arc<TemplateRenderer>,
        capturer: Arc<dyn PageCapturer>,
        video: Arc<dyn VideoAssembler>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            copy,
            renderer,
            capturer,
            video,
        }
    }

    /// Wires the production collaborators. Template and video-command problems
    /// surface here, before any job is accepted.
    pub fn from_app_config(app: &AppConfig) -> Result<Self, PipelineError> {
        let renderer = match &app.template_path {
            Some(path) => TemplateRenderer::from_path(path),
            None => TemplateRenderer::builtin(),
        }
        .map_err(|err| PipelineError::new("startup", PipelineErrorKind::Render, err.to_string()))?;

        let video = CommandVideoAssembler::from_command_line(&app.video_command).map_err(|err| {
            PipelineError::new("startup", PipelineErrorKind::Internal, err.to_string())
        })?;

        let llm = Arc::new(LlmClient::new(LlmConfig::from_env()));
        Ok(Self::new(
            PipelineConfig {
                work_dir: app.work_dir.clone(),
            },
            Arc::new(LlmCopyGenerator::new(llm, app.copy_timeout)),
            Arc::new(renderer),
            Arc::new(ChromeCapturer::new(app.capture.clone())),
            Arc::new(video),
        ))
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.config.work_dir.join(job_id)
    }

    pub async fn run(&self, job: ListingJob) -> Result<RunReport, PipelineError> {
        let job = Arc::new(job);
        let mut stages = Vec::new();
        info!(target = "reel.pipeline", job_id = %job.id, "pipeline_started");

        let images = self
            .capture_stage("validate", &mut stages, {
                let job = job.clone();
                async move { stages::validate(&job) }
            })
            .await?;

        let copy = self
            .capture_stage("generate_copy", &mut stages, {
                let job = job.clone();
                let generator = self.copy.clone();
                async move { stages::generate_copy(&job, generator.as_ref()).await }
            })
            .await?;

        let job_dir = self.job_dir(&job.id);
        let document = self
            .capture_stage("render_template", &mut stages, {
                let renderer = self.renderer.clone();
                let path = job_dir.join(DOCUMENT_FILE);
                async move { stages::render_template(&renderer, &images, &copy, path).await }
            })
            .await?;

        let images_dir = job_dir.join(IMAGES_DIR);
        self.capture_stage("capture", &mut stages, {
            let capturer = self.capturer.clone();
            let images_dir = images_dir.clone();
            async move { stages::capture(capturer.as_ref(), &document, &images_dir).await }
        })
        .await?;

        self.capture_stage("assemble_video", &mut stages, {
            let video = self.video.clone();
            let job = job.clone();
            let images_dir = images_dir.clone();
            async move { stages::assemble_video(video.as_ref(), &job.id, &images_dir).await }
        })
        .await?;

        let served_video = tokio::fs::try_exists(job_dir.join(VIDEO_FILE))
            .await
            .unwrap_or(false)
            .then(|| video_url(&job.id));
        if served_video.is_none() {
            warn!(target = "reel.pipeline", job_id = %job.id, "video command left no {VIDEO_FILE}");
        }

        info!(target = "reel.pipeline", job_id = %job.id, "pipeline_completed");
        Ok(RunReport {
            job_id: job.id.clone(),
            images_dir,
            video_url: served_video,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await.inspect_err(|err| {
            warn!(
                target = "reel.pipeline",
                stage = name,
                kind = ?err.kind(),
                error = %err.detail(),
                "stage_failed"
            );
        })?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

/// Public path of a job's video under the `/videos` file route.
pub fn video_url(job_id: &str) -> String {
    format!("/videos/{job_id}/{VIDEO_FILE}")
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed ({kind:?}): {message}")]
pub struct PipelineError {
    stage: &'static str,
    kind: PipelineErrorKind,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    Validation,
    CopyGeneration,
    Render,
    Launch,
    Navigation,
    Capture,
    EmptyCapture,
    ExternalCommand,
    Internal,
}

/// What a scheduler should do with a failed job. The pipeline itself never
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Caller error; resubmitting the same job fails the same way.
    Never,
    /// Transient upstream failure; retry the job with backoff.
    Backoff,
    /// Browser automation failure; re-running the capture may succeed.
    RerunCapture,
    /// Like `RerunCapture`, but repeats point at the environment and should
    /// escalate instead of looping.
    EscalateOnRepeat,
    /// Side effects may be partially applied; report and stop.
    Surface,
}

impl PipelineErrorKind {
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            Self::Validation => RetryPolicy::Never,
            Self::CopyGeneration => RetryPolicy::Backoff,
            Self::Launch => RetryPolicy::EscalateOnRepeat,
            Self::Navigation | Self::Capture => RetryPolicy::RerunCapture,
            Self::ExternalCommand => RetryPolicy::Surface,
            Self::Render | Self::EmptyCapture | Self::Internal => RetryPolicy::Never,
        }
    }
}

impl PipelineError {
    pub fn new(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validate", PipelineErrorKind::Validation, message)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Internal, message)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl From<CopyError> for PipelineError {
    fn from(err: CopyError) -> Self {
        Self::new(
            "generate_copy",
            PipelineErrorKind::CopyGeneration,
            err.to_string(),
        )
    }
}

impl From<RenderError> for PipelineError {
    fn from(err: RenderError) -> Self {
        Self::new("render_template", PipelineErrorKind::Render, err.to_string())
    }
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        let kind = match &err {
            CaptureError::Launch(_) => PipelineErrorKind::Launch,
            CaptureError::Navigation(_) => PipelineErrorKind::Navigation,
            CaptureError::Screenshot(_) | CaptureError::Write { .. } => PipelineErrorKind::Capture,
        };
        Self::new("capture", kind, err.to_string())
    }
}

impl From<VideoError> for PipelineError {
    fn from(err: VideoError) -> Self {
        let message = match &err {
            VideoError::Failed { stdout, .. } if !stdout.trim().is_empty() => {
                format!("{err}; stdout: {}", stdout.trim())
            }
            _ => err.to_string(),
        };
        Self::new("assemble_video", PipelineErrorKind::ExternalCommand, message)
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;
    use crate::capture::PageCapturer;
    use crate::models::{CaptureResult, GeneratedCopy};
    use crate::render::TemplateData;
    use std::path::Path;

    /// Checks the job before anything external is touched.
    pub fn validate(job: &ListingJob) -> Result<StageOutcome<[String; IMAGE_SLOTS]>, PipelineError> {
        if job.id.is_empty() {
            return Err(PipelineError::validation("job id is empty"));
        }
        if !job
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PipelineError::validation(format!(
                "job id `{}` must use only [A-Za-z0-9_-]",
                job.id
            )));
        }

        let images: [String; IMAGE_SLOTS] =
            job.image_links.clone().try_into().map_err(|links: Vec<String>| {
                PipelineError::validation(format!(
                    "expected {IMAGE_SLOTS} image links, got {}",
                    links.len()
                ))
            })?;

        for link in &images {
            let parsed = reqwest::Url::parse(link)
                .map_err(|_| PipelineError::validation(format!("invalid image url: {link}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(PipelineError::validation(format!(
                    "unsupported image url scheme: {link}"
                )));
            }
        }

        Ok(StageOutcome::new(
            images.clone(),
            json!({
                "job_id": job.id,
                "image_count": images.len(),
            }),
        ))
    }

    pub async fn generate_copy(
        job: &ListingJob,
        generator: &dyn CopyGenerator,
    ) -> Result<StageOutcome<GeneratedCopy>, PipelineError> {
        let copy = generator
            .generate_copy(&job.product_name, &job.product_description)
            .await?;
        let lengths: Vec<usize> = copy.pages().iter().map(|text| text.chars().count()).collect();
        Ok(StageOutcome::new(
            copy.clone(),
            json!({
                "pages": copy,
                "char_counts": lengths,
            }),
        ))
    }

    /// Renders the carousel and swaps it into place at `path`.
    pub async fn render_template(
        renderer: &TemplateRenderer,
        images: &[String; IMAGE_SLOTS],
        copy: &GeneratedCopy,
        path: PathBuf,
    ) -> Result<StageOutcome<PathBuf>, PipelineError> {
        let html = renderer.render(&TemplateData::bind(images, copy))?;

        let io_err =
            |err: std::io::Error| PipelineError::internal("render_template", err.to_string());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let staging = path.with_extension("html.tmp");
        tokio::fs::write(&staging, &html).await.map_err(io_err)?;
        tokio::fs::rename(&staging, &path).await.map_err(io_err)?;

        Ok(StageOutcome::new(
            path.clone(),
            json!({
                "path": path,
                "bytes": html.len(),
            }),
        ))
    }

    pub async fn capture(
        capturer: &dyn PageCapturer,
        document: &Path,
        images_dir: &Path,
    ) -> Result<StageOutcome<CaptureResult>, PipelineError> {
        let result = capturer.capture(document, images_dir).await?;

        if result.is_empty() {
            warn!(
                target = "reel.pipeline",
                document = %document.display(),
                "capture found no page elements"
            );
            return Err(PipelineError::new(
                "capture",
                PipelineErrorKind::EmptyCapture,
                format!(
                    "no page elements in {}; full page saved at {}",
                    document.display(),
                    result.full_page_path.display()
                ),
            ));
        }
        if result.page_paths.len() != IMAGE_SLOTS {
            warn!(
                target = "reel.pipeline",
                expected = IMAGE_SLOTS,
                found = result.page_paths.len(),
                "unexpected page element count"
            );
        }

        Ok(StageOutcome::new(
            result.clone(),
            json!({
                "full_page": result.full_page_path,
                "pages": result.page_paths,
            }),
        ))
    }

    pub async fn assemble_video(
        video: &dyn VideoAssembler,
        job_id: &str,
        images_dir: &Path,
    ) -> Result<StageOutcome<()>, PipelineError> {
        let result = video.assemble_video(job_id, images_dir).await?;
        Ok(StageOutcome::new(
            (),
            json!({
                "exit_code": result.exit_code,
                "stdout": result.stdout,
                "stderr": result.stderr,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FULL_PAGE_FILE, ensure_dir, page_file_name};
    use crate::copy::parse_copy;
    use crate::models::{CaptureResult, GeneratedCopy, VideoResult};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use uuid::Uuid;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Replies with canned text and parses it like the real generator does.
    struct CannedCopy {
        reply: String,
        journal: Journal,
    }

    #[async_trait]
    impl CopyGenerator for CannedCopy {
        async fn generate_copy(
            &self,
            product_name: &str,
            _product_description: &str,
        ) -> Result<GeneratedCopy, CopyError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("copy:{product_name}"));
            parse_copy(&self.reply)
        }
    }

    /// Writes one placeholder PNG per `class="page"` found in the document.
    struct FileCapturer {
        journal: Journal,
        fail_with: Option<fn() -> CaptureError>,
    }

    #[async_trait]
    impl PageCapturer for FileCapturer {
        async fn capture(
            &self,
            document: &Path,
            output_dir: &Path,
        ) -> Result<CaptureResult, CaptureError> {
            let html = tokio::fs::read_to_string(document)
                .await
                .map_err(|err| CaptureError::Navigation(err.to_string()))?;
            self.journal.lock().unwrap().push("capture".into());
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            ensure_dir(output_dir).await?;
            let full_page_path = output_dir.join(FULL_PAGE_FILE);
            std::fs::write(&full_page_path, html.as_bytes()).unwrap();
            let page_paths = (1..=html.matches("class=\"page\"").count())
                .map(|n| {
                    let path = output_dir.join(page_file_name(n));
                    std::fs::write(&path, format!("page {n}")).unwrap();
                    path
                })
                .collect();
            Ok(CaptureResult {
                full_page_path,
                page_paths,
            })
        }
    }

    struct ScriptedVideo {
        journal: Journal,
        exit_code: i32,
    }

    #[async_trait]
    impl VideoAssembler for ScriptedVideo {
        async fn assemble_video(
            &self,
            job_id: &str,
            images_dir: &Path,
        ) -> Result<VideoResult, VideoError> {
            self.journal.lock().unwrap().push(format!("video:{job_id}"));
            assert!(images_dir.join("page-1.png").is_file());
            if self.exit_code != 0 {
                return Err(VideoError::Failed {
                    command: "sh scripts/make-videos.sh".into(),
                    exit_code: Some(self.exit_code),
                    stdout: "encoding".into(),
                    stderr: "ffmpeg: codec missing".into(),
                });
            }
            if let Some(job_dir) = images_dir.parent() {
                std::fs::write(job_dir.join(VIDEO_FILE), b"mp4").unwrap();
            }
            Ok(VideoResult {
                exit_code: Some(0),
                stdout: "wrote product-video.mp4".into(),
                stderr: String::new(),
            })
        }
    }

    struct Harness {
        pipeline: Pipeline,
        journal: Journal,
        work_dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.work_dir);
        }
    }

    const GOOD_COPY: &str = r#"{"page_1":"A","page_2":"B","page_3":"C"}"#;

    fn harness(reply: &str) -> Harness {
        build(reply, TemplateRenderer::builtin().unwrap(), None, 0)
    }

    fn build(
        reply: &str,
        renderer: TemplateRenderer,
        fail_with: Option<fn() -> CaptureError>,
        video_exit: i32,
    ) -> Harness {
        let journal: Journal = Arc::default();
        let work_dir =
            std::env::temp_dir().join(format!("listing-reel-pipeline-{}", Uuid::new_v4().simple()));
        let pipeline = Pipeline::new(
            PipelineConfig {
                work_dir: work_dir.clone(),
            },
            Arc::new(CannedCopy {
                reply: reply.to_string(),
                journal: journal.clone(),
            }),
            Arc::new(renderer),
            Arc::new(FileCapturer {
                journal: journal.clone(),
                fail_with,
            }),
            Arc::new(ScriptedVideo {
                journal: journal.clone(),
                exit_code: video_exit,
            }),
        );
        Harness {
            pipeline,
            journal,
            work_dir,
        }
    }

    fn sample_job() -> ListingJob {
        ListingJob {
            id: "T1".into(),
            product_name: "Wireless Headphones".into(),
            product_description: "Noise-cancelling, 30h battery".into(),
            image_links: vec![
                "https://img.test/u1.jpg".into(),
                "https://img.test/u2.jpg".into(),
                "https://img.test/u3.jpg".into(),
            ],
        }
    }

    fn journal(h: &Harness) -> Vec<String> {
        h.journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn end_to_end_produces_all_artifacts() {
        let h = harness(GOOD_COPY);
        let report = h.pipeline.run(sample_job()).await.expect("pipeline run");

        let names: Vec<&str> = report.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "validate",
                "generate_copy",
                "render_template",
                "capture",
                "assemble_video"
            ]
        );
        assert_eq!(
            journal(&h),
            vec!["copy:Wireless Headphones", "capture", "video:T1"]
        );

        let job_dir = h.work_dir.join("T1");
        let html = std::fs::read_to_string(job_dir.join(DOCUMENT_FILE)).unwrap();
        for (image, text) in [("u1.jpg", "A"), ("u2.jpg", "B"), ("u3.jpg", "C")] {
            let image_at = html.find(image).unwrap();
            let text_at = html.find(&format!("<p>{text}</p>")).unwrap();
            assert!(image_at < text_at);
        }

        let images = job_dir.join(IMAGES_DIR);
        assert_eq!(report.images_dir, images);
        for file in ["full-page.png", "page-1.png", "page-2.png", "page-3.png"] {
            assert!(images.join(file).is_file(), "missing {file}");
        }
        assert!(!images.join("page-4.png").exists());
        assert_eq!(
            report.stages[4].output["stdout"],
            json!("wrote product-video.mp4")
        );
        assert_eq!(
            report.video_url.as_deref(),
            Some("/videos/T1/product-video.mp4")
        );
        assert!(job_dir.join(VIDEO_FILE).is_file());
    }

    #[tokio::test]
    async fn non_json_copy_stops_before_rendering() {
        let h = harness("Sure! Here are three descriptions...");
        let err = h.pipeline.run(sample_job()).await.unwrap_err();

        assert_eq!(err.stage(), "generate_copy");
        assert_eq!(err.kind(), PipelineErrorKind::CopyGeneration);
        assert_eq!(journal(&h), vec!["copy:Wireless Headphones"]);
        assert!(!h.work_dir.join("T1").join(DOCUMENT_FILE).exists());
        assert!(!h.work_dir.join("T1").join(IMAGES_DIR).exists());
    }

    #[tokio::test]
    async fn copy_with_missing_or_non_string_pages_fails() {
        for reply in [
            r#"{"page_1":"A","page_2":"B"}"#,
            r#"{"page_1":"A","page_2":["B"],"page_3":"C"}"#,
        ] {
            let h = harness(reply);
            let err = h.pipeline.run(sample_job()).await.unwrap_err();
            assert_eq!(err.kind(), PipelineErrorKind::CopyGeneration, "{reply}");
            assert!(!h.work_dir.join("T1").join(IMAGES_DIR).exists());
        }
    }

    #[tokio::test]
    async fn wrong_link_count_fails_without_external_calls() {
        for count in [2, 4] {
            let h = harness(GOOD_COPY);
            let mut job = sample_job();
            job.image_links = (1..=count)
                .map(|n| format!("https://img.test/u{n}.jpg"))
                .collect();
            let err = h.pipeline.run(job).await.unwrap_err();
            assert_eq!(err.stage(), "validate");
            assert_eq!(err.kind(), PipelineErrorKind::Validation);
            assert_eq!(err.kind().retry_policy(), RetryPolicy::Never);
            assert!(journal(&h).is_empty());
        }
    }

    #[tokio::test]
    async fn path_like_job_id_is_rejected() {
        let h = harness(GOOD_COPY);
        let mut job = sample_job();
        job.id = "../escape".into();
        let err = h.pipeline.run(job).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Validation);
        assert!(journal(&h).is_empty());
    }

    #[tokio::test]
    async fn non_http_image_link_is_rejected() {
        let h = harness(GOOD_COPY);
        let mut job = sample_job();
        job.image_links[1] = "file:///etc/passwd".into();
        let err = h.pipeline.run(job).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Validation);
        assert!(err.detail().contains("scheme"));
    }

    #[tokio::test]
    async fn rerun_overwrites_same_artifacts() {
        let h = harness(GOOD_COPY);
        let first = h.pipeline.run(sample_job()).await.unwrap();
        let second = h.pipeline.run(sample_job()).await.unwrap();
        assert_eq!(first.images_dir, second.images_dir);
        assert_eq!(first.stages[3].output, second.stages[3].output);

        let mut files: Vec<String> = std::fs::read_dir(&second.images_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec!["full-page.png", "page-1.png", "page-2.png", "page-3.png"]
        );
    }

    #[tokio::test]
    async fn jobs_do_not_share_directories() {
        let h = harness(GOOD_COPY);
        let mut other = sample_job();
        other.id = "T2".into();
        let a = h.pipeline.run(sample_job()).await.unwrap();
        let b = h.pipeline.run(other).await.unwrap();
        assert_ne!(a.images_dir, b.images_dir);
    }

    #[tokio::test]
    async fn zero_page_elements_is_distinct_and_skips_video() {
        let renderer = TemplateRenderer::from_source(
            "<div><img src=\"{{image1}}\">{{text1}}<img src=\"{{image2}}\">{{text2}}<img src=\"{{image3}}\">{{text3}}</div>",
        )
        .unwrap();
        let h = build(GOOD_COPY, renderer, None, 0);
        let err = h.pipeline.run(sample_job()).await.unwrap_err();

        assert_eq!(err.stage(), "capture");
        assert_eq!(err.kind(), PipelineErrorKind::EmptyCapture);
        assert_ne!(err.kind(), PipelineErrorKind::Capture);
        assert!(
            h.work_dir
                .join("T1")
                .join(IMAGES_DIR)
                .join(FULL_PAGE_FILE)
                .is_file()
        );
        assert!(!journal(&h).iter().any(|entry| entry.starts_with("video")));
    }

    #[tokio::test]
    async fn capture_failures_keep_their_kind() {
        let cases: [(fn() -> CaptureError, PipelineErrorKind); 3] = [
            (
                || CaptureError::Launch("no chrome".into()),
                PipelineErrorKind::Launch,
            ),
            (
                || CaptureError::Navigation("crashed".into()),
                PipelineErrorKind::Navigation,
            ),
            (
                || CaptureError::Screenshot("detached".into()),
                PipelineErrorKind::Capture,
            ),
        ];
        for (fail, kind) in cases {
            let h = build(GOOD_COPY, TemplateRenderer::builtin().unwrap(), Some(fail), 0);
            let err = h.pipeline.run(sample_job()).await.unwrap_err();
            assert_eq!(err.stage(), "capture");
            assert_eq!(err.kind(), kind);
            assert!(!journal(&h).iter().any(|entry| entry.starts_with("video")));
        }
    }

    #[tokio::test]
    async fn video_failure_is_surfaced_with_output() {
        let h = build(GOOD_COPY, TemplateRenderer::builtin().unwrap(), None, 2);
        let err = h.pipeline.run(sample_job()).await.unwrap_err();
        assert_eq!(err.stage(), "assemble_video");
        assert_eq!(err.kind(), PipelineErrorKind::ExternalCommand);
        assert_eq!(err.kind().retry_policy(), RetryPolicy::Surface);
        assert!(err.detail().contains("ffmpeg: codec missing"));
        assert!(err.detail().contains("stdout: encoding"));
    }

    #[test]
    fn retry_policies_follow_error_taxonomy() {
        use PipelineErrorKind::*;
        assert_eq!(CopyGeneration.retry_policy(), RetryPolicy::Backoff);
        assert_eq!(Launch.retry_policy(), RetryPolicy::EscalateOnRepeat);
        assert_eq!(Navigation.retry_policy(), RetryPolicy::RerunCapture);
        assert_eq!(Capture.retry_policy(), RetryPolicy::RerunCapture);
        assert_eq!(Validation.retry_policy(), RetryPolicy::Never);
    }
}
