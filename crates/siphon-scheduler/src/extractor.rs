use crate::context::TaskContext;
use siphon_core::{ExtractError, FormatHint, RawFields};
use siphon_stream::ExtractionInput;
use std::collections::HashMap;
use std::sync::Arc;

/// Format-specific field extraction. The scheduler treats it as a black box.
///
/// The input is owned by the call; stream resources are released when the
/// call returns or unwinds.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, input: ExtractionInput, ctx: &TaskContext) -> Result<RawFields, ExtractError>;
}

impl<F> FieldExtractor for F
where
    F: Fn(ExtractionInput, &TaskContext) -> Result<RawFields, ExtractError> + Send + Sync,
{
    fn extract(&self, input: ExtractionInput, ctx: &TaskContext) -> Result<RawFields, ExtractError> {
        self(input, ctx)
    }
}

/// Field extractors by format hint, with an optional catch-all.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_format: HashMap<FormatHint, Arc<dyn FieldExtractor>>,
    fallback: Option<Arc<dyn FieldExtractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<&str> = self.by_format.keys().map(FormatHint::as_str).collect();
        formats.sort_unstable();
        f.debug_struct("ExtractorRegistry")
            .field("formats", &formats)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        format: impl Into<FormatHint>,
        extractor: impl FieldExtractor + 'static,
    ) -> &mut Self {
        self.by_format.insert(format.into(), Arc::new(extractor));
        self
    }

    pub fn register_shared(
        &mut self,
        format: impl Into<FormatHint>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> &mut Self {
        self.by_format.insert(format.into(), extractor);
        self
    }

    pub fn set_fallback(&mut self, extractor: impl FieldExtractor + 'static) -> &mut Self {
        self.fallback = Some(Arc::new(extractor));
        self
    }

    pub fn set_fallback_shared(&mut self, extractor: Arc<dyn FieldExtractor>) -> &mut Self {
        self.fallback = Some(extractor);
        self
    }

    pub fn get(&self, format: &FormatHint) -> Option<Arc<dyn FieldExtractor>> {
        self.by_format
            .get(format)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Like [`ExtractorRegistry::get`], but a missing extractor is a permanent failure.
    pub fn resolve(&self, format: &FormatHint) -> Result<Arc<dyn FieldExtractor>, ExtractError> {
        self.get(format)
            .ok_or_else(|| ExtractError::Unsupported(format.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_format.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_format.is_empty() && self.fallback.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_core::ErrorKind;
    use siphon_stream::WholeFile;

    fn tagging(tag: &'static str) -> impl FieldExtractor {
        move |_input: ExtractionInput, _ctx: &TaskContext| -> Result<RawFields, ExtractError> {
            let mut fields = RawFields::new();
            fields.insert("by".into(), tag.into());
            Ok(fields)
        }
    }

    fn input() -> ExtractionInput {
        ExtractionInput::Whole(WholeFile {
            file: "f".into(),
            format: FormatHint::new("png"),
            bytes: Arc::from(&b"x"[..]),
        })
    }

    #[test]
    fn exact_formats_win_over_fallback() {
        let mut registry = ExtractorRegistry::new();
        registry.register("PNG", tagging("png")).set_fallback(tagging("any"));
        let ctx = TaskContext::standalone("f", "png");

        let png = registry.resolve(&FormatHint::new("png")).unwrap();
        assert_eq!(png.extract(input(), &ctx).unwrap()["by"], "png");
        let other = registry.resolve(&FormatHint::new("tiff")).unwrap();
        assert_eq!(other.extract(input(), &ctx).unwrap()["by"], "any");
    }

    #[test]
    fn missing_extractor_is_unsupported() {
        let registry = ExtractorRegistry::new();
        assert!(registry.is_empty());
        let err = registry.resolve(&FormatHint::new("xyz")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::PermanentFormat);
    }
}
