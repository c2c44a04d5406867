use crate::models::{GeneratedCopy, IMAGE_SLOTS};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const TEMPLATE_NAME: &str = "product_pages";
const BUILTIN_TEMPLATE: &str = include_str!("../templates/product-pages.html");

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("template does not compile: {0}")]
    Compile(#[from] Box<handlebars::TemplateError>),
    #[error("template render failed: {0}")]
    Render(#[from] Box<handlebars::RenderError>),
}

/// The six slots of the carousel template.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TemplateData {
    pub image1: String,
    pub text1: String,
    pub image2: String,
    pub text2: String,
    pub image3: String,
    pub text3: String,
}

impl TemplateData {
    /// Pairs image `i` with copy page `i + 1`.
    pub fn bind(images: &[String; IMAGE_SLOTS], copy: &GeneratedCopy) -> Self {
        let [image1, image2, image3] = images.clone();
        Self {
            image1,
            text1: copy.page_1.clone(),
            image2,
            text2: copy.page_2.clone(),
            image3,
            text3: copy.page_3.clone(),
        }
    }
}

/// Compiled carousel template. Built once at startup and shared by every job.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn builtin() -> Result<Self, RenderError> {
        Self::from_source(BUILTIN_TEMPLATE)
    }

    pub fn from_path(path: &Path) -> Result<Self, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|source| RenderError::Read {
            path: path.display().to_string(),
            source,
        })?;
        info!(target = "reel.render", path = %path.display(), "template_loaded");
        Self::from_source(&source)
    }

    pub fn from_source(source: &str) -> Result<Self, RenderError> {
        let mut registry = Handlebars::new();
        // Unknown variables are errors, never blank output.
        registry.set_strict_mode(true);
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(Box::new)?;
        Ok(Self { registry })
    }

    pub fn render(&self, data: &TemplateData) -> Result<String, RenderError> {
        self.registry
            .render(TEMPLATE_NAME, data)
            .map_err(|err| RenderError::Render(Box::new(err)))
    }
}
