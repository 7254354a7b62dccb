//! Watermark detection and removal on the PDF object graph.
//!
//! The remover walks each page content stream once, tracking the graphics
//! state stack, and marks constructs that look like watermarks:
//!
//! - marked-content sections tagged `/Artifact` with subtype `Watermark`, or
//!   optional-content sections whose group name contains "watermark";
//! - `/Watermark` annotations;
//! - text and XObject draws made at low opacity;
//! - form XObjects tagged by Acrobat as watermarks;
//! - rotated text repeated on every page.
//!
//! Dropped text keeps its state operators so the rest of the page renders as
//! before. Pages without matches are not rewritten.

use std::collections::HashSet;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::objects::{self, LoadedDocument};
use crate::error::{ConversionError, EncodingError, ParseError};
use crate::models::WatermarkConfig;

/// Operators kept when a text block is dropped.
const TEXT_STATE_OPERATORS: &[&str] = &[
    "Tf", "Tc", "Tw", "Tz", "TL", "Ts", "Tr", "gs", "g", "G", "rg", "RG", "k", "K", "cs", "CS",
    "sc", "SC", "scn", "SCN", "w", "d", "ri", "i", "j", "J", "M", "BMC", "BDC", "EMC", "MP", "DP",
];

/// Operators kept when a whole watermark layer is dropped.
const GRAPHICS_STATE_OPERATORS: &[&str] = &[
    "q", "Q", "cm", "Tf", "Tc", "Tw", "Tz", "TL", "Ts", "Tr", "gs", "g", "G", "rg", "RG", "k", "K",
    "cs", "CS", "sc", "SC", "scn", "SCN", "w", "d", "ri", "i", "j", "J", "M",
];

/// Kind of construct the remover took out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    NamedLayer,
    Annotation,
    LowOpacity,
    TaggedXObject,
    RepeatedText,
}

/// Removals on a single page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageRemoval {
    /// 1-based page number.
    pub page: u32,
    pub named_layers: u32,
    pub annotations: u32,
    pub low_opacity: u32,
    pub tagged_xobjects: u32,
    pub repeated_text: u32,
}

impl PageRemoval {
    fn new(page: u32) -> Self {
        Self {
            page,
            ..Default::default()
        }
    }

    fn record(&mut self, kind: WatermarkKind) {
        match kind {
            WatermarkKind::NamedLayer => self.named_layers += 1,
            WatermarkKind::Annotation => self.annotations += 1,
            WatermarkKind::LowOpacity => self.low_opacity += 1,
            WatermarkKind::TaggedXObject => self.tagged_xobjects += 1,
            WatermarkKind::RepeatedText => self.repeated_text += 1,
        }
    }

    /// Number of constructs removed from this page.
    pub fn total(&self) -> u32 {
        self.named_layers
            + self.annotations
            + self.low_opacity
            + self.tagged_xobjects
            + self.repeated_text
    }
}

/// Summary of a removal run, one entry per cleaned page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub pages: Vec<PageRemoval>,
}

impl RemovalReport {
    pub fn total(&self) -> u32 {
        self.pages.iter().map(PageRemoval::total).sum()
    }

    /// Number of pages that had at least one construct removed.
    pub fn pages_changed(&self) -> usize {
        self.pages.iter().filter(|p| p.total() > 0).count()
    }

    pub fn count(&self, kind: WatermarkKind) -> u32 {
        self.pages
            .iter()
            .map(|p| match kind {
                WatermarkKind::NamedLayer => p.named_layers,
                WatermarkKind::Annotation => p.annotations,
                WatermarkKind::LowOpacity => p.low_opacity,
                WatermarkKind::TaggedXObject => p.tagged_xobjects,
                WatermarkKind::RepeatedText => p.repeated_text,
            })
            .sum()
    }
}

/// Entry point of the removal state machine.
///
/// ```no_run
/// use doconv_core::pdf::WatermarkRemover;
///
/// let bytes = std::fs::read("input.pdf").unwrap();
/// let mut scanned = WatermarkRemover::new().load(&bytes).unwrap().scan();
/// for page in 1..=scanned.page_count() {
///     scanned.clean_page(page).unwrap();
/// }
/// let (cleaned, report) = scanned.save().unwrap();
/// println!("removed {} constructs, {} bytes", report.total(), cleaned.len());
/// ```
#[derive(Debug, Clone, Default)]
pub struct WatermarkRemover {
    config: WatermarkConfig,
}

impl WatermarkRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &WatermarkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Parse the source PDF.
    pub fn load(&self, bytes: &[u8]) -> Result<LoadedPdf, ParseError> {
        let LoadedDocument { doc, page_ids, .. } = objects::load_document(bytes)?;
        Ok(LoadedPdf {
            config: self.config.clone(),
            doc,
            page_ids,
        })
    }

    /// Run every stage without progress reporting.
    pub fn remove(&self, bytes: &[u8]) -> Result<(Vec<u8>, RemovalReport), ConversionError> {
        let mut scanned = self.load(bytes)?.scan();
        for page in 1..=scanned.page_count() {
            scanned.clean_page(page)?;
        }
        Ok(scanned.save()?)
    }
}

/// A parsed document waiting for the document-wide scan.
#[derive(Debug)]
pub struct LoadedPdf {
    config: WatermarkConfig,
    doc: Document,
    page_ids: Vec<ObjectId>,
}

impl LoadedPdf {
    pub fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    /// Find rotated text that repeats on every page.
    pub fn scan(self) -> ScannedPdf {
        let repeated = if self.config.repeated_text && self.page_ids.len() >= 2 {
            repeated_rotated_text(&self.doc, &self.page_ids, &self.config)
        } else {
            HashSet::new()
        };
        debug!("Scan found {} repeated rotated text(s)", repeated.len());

        ScannedPdf {
            config: self.config,
            doc: self.doc,
            page_ids: self.page_ids,
            repeated,
            report: RemovalReport::default(),
        }
    }
}

/// A scanned document whose pages are cleaned one at a time.
pub struct ScannedPdf {
    config: WatermarkConfig,
    doc: Document,
    page_ids: Vec<ObjectId>,
    repeated: HashSet<String>,
    report: RemovalReport,
}

impl ScannedPdf {
    pub fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    /// Remove watermark constructs from page `index` (1-based).
    pub fn clean_page(&mut self, index: u32) -> Result<PageRemoval, EncodingError> {
        let page_id = *(index as usize)
            .checked_sub(1)
            .and_then(|i| self.page_ids.get(i))
            .ok_or_else(|| EncodingError::InvalidContent(format!("page {} out of range", index)))?;

        let mut removal = PageRemoval::new(index);
        if self.config.annotations {
            for _ in 0..self.remove_annotations(page_id) {
                removal.record(WatermarkKind::Annotation);
            }
        }
        self.clean_content(page_id, &mut removal)?;

        if removal.total() > 0 {
            debug!("Page {}: removed {} construct(s)", index, removal.total());
        }
        self.report.pages.push(removal.clone());
        Ok(removal)
    }

    /// Drop unreferenced objects and serialize the cleaned document.
    pub fn save(mut self) -> Result<(Vec<u8>, RemovalReport), EncodingError> {
        let pruned = self.doc.prune_objects();
        trace!("Pruned {} unreferenced objects", pruned.len());
        self.doc.compress();

        let mut buf = Vec::new();
        self.doc
            .save_to(&mut buf)
            .map_err(|e| EncodingError::Pdf(e.to_string()))?;

        info!(
            "Removed {} watermark construct(s) from {} of {} pages",
            self.report.total(),
            self.report.pages_changed(),
            self.page_ids.len()
        );
        Ok((buf, self.report))
    }

    fn remove_annotations(&mut self, page_id: ObjectId) -> u32 {
        let Ok(annots) = self
            .doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .and_then(|page| page.get(b"Annots"))
        else {
            return 0;
        };
        let Ok((_, Object::Array(items))) = self.doc.dereference(annots) else {
            return 0;
        };

        let (removed, kept): (Vec<Object>, Vec<Object>) = items
            .iter()
            .cloned()
            .partition(|item| is_watermark_annotation(&self.doc, item));
        if removed.is_empty() {
            return 0;
        }

        if let Ok(page) = self
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
        {
            if kept.is_empty() {
                page.remove(b"Annots");
            } else {
                page.set("Annots", kept);
            }
        }
        removed.len() as u32
    }

    fn clean_content(
        &mut self,
        page_id: ObjectId,
        removal: &mut PageRemoval,
    ) -> Result<(), EncodingError> {
        let Some(operations) = page_operations(&self.doc, page_id) else {
            return Ok(());
        };
        let resources = objects::page_resources(&self.doc, page_id).unwrap_or_default();
        let analysis = analyze(&self.doc, &resources, &operations, &self.config);

        let mut marks: Vec<Option<Retain>> = vec![None; operations.len()];

        for section in &analysis.sections {
            if marks[section.start].is_some() {
                continue;
            }
            let inner_end = match section.end {
                Some(end) => {
                    marks[end] = Some(Retain::Nothing);
                    end
                }
                None => operations.len(),
            };
            marks[section.start] = Some(Retain::Nothing);
            for mark in &mut marks[section.start + 1..inner_end] {
                mark.get_or_insert(Retain::GraphicsState);
            }
            removal.record(WatermarkKind::NamedLayer);
        }

        for block in &analysis.blocks {
            let kind = if block.low_alpha {
                WatermarkKind::LowOpacity
            } else if block.rotated && self.repeated.contains(&block.text) {
                WatermarkKind::RepeatedText
            } else {
                continue;
            };
            if marks[block.start].is_some() {
                continue;
            }
            trace!("Dropping {:?} text block {:?}", kind, block.text);
            for mark in &mut marks[block.start..=block.end] {
                mark.get_or_insert(Retain::TextState);
            }
            removal.record(kind);
        }

        for draw in &analysis.draws {
            let kind = if draw.tagged {
                WatermarkKind::TaggedXObject
            } else if draw.low_alpha {
                WatermarkKind::LowOpacity
            } else {
                continue;
            };
            if marks[draw.index].is_some() {
                continue;
            }
            marks[draw.index] = Some(Retain::Nothing);
            removal.record(kind);
        }

        if marks.iter().all(Option::is_none) {
            return Ok(());
        }

        let kept: Vec<Operation> = operations
            .into_iter()
            .zip(marks)
            .filter(|(op, mark)| mark.is_none_or(|retain| retain.keeps(&op.operator)))
            .map(|(op, _)| op)
            .collect();

        let encoded = Content { operations: kept }
            .encode()
            .map_err(|e| EncodingError::Pdf(e.to_string()))?;
        let stream_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));
        if let Ok(page) = self
            .doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
        {
            page.set("Contents", Object::Reference(stream_id));
        }
        Ok(())
    }
}

/// Which operators survive inside a dropped range.
#[derive(Debug, Clone, Copy)]
enum Retain {
    Nothing,
    TextState,
    GraphicsState,
}

impl Retain {
    fn keeps(self, operator: &str) -> bool {
        match self {
            Retain::Nothing => false,
            Retain::TextState => TEXT_STATE_OPERATORS.contains(&operator),
            Retain::GraphicsState => GRAPHICS_STATE_OPERATORS.contains(&operator),
        }
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_alpha: f32,
    stroke_alpha: f32,
    render_mode: i64,
    rotated: bool,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            render_mode: 0,
            rotated: false,
        }
    }
}

/// A marked-content section identified as a watermark layer.
struct Section {
    start: usize,
    /// Matching `EMC`, if the stream has one.
    end: Option<usize>,
}

/// A `BT`..`ET` block.
struct TextBlock {
    start: usize,
    end: usize,
    text: String,
    rotated: bool,
    /// Every text-showing operator ran at low opacity.
    low_alpha: bool,
}

struct XObjectDraw {
    index: usize,
    tagged: bool,
    low_alpha: bool,
}

#[derive(Default)]
struct PageAnalysis {
    sections: Vec<Section>,
    blocks: Vec<TextBlock>,
    draws: Vec<XObjectDraw>,
}

struct OpenBlock {
    start: usize,
    fragments: Vec<String>,
    shows: usize,
    low_shows: usize,
    rotated: bool,
}

fn page_operations(doc: &Document, page_id: ObjectId) -> Option<Vec<Operation>> {
    let data = match doc.get_page_content(page_id) {
        Ok(data) => data,
        Err(e) => {
            warn!("Skipping page {:?}: unreadable content ({})", page_id, e);
            return None;
        }
    };
    match Content::decode(&data) {
        Ok(content) => Some(content.operations),
        Err(e) => {
            warn!("Skipping page {:?}: undecodable content ({})", page_id, e);
            None
        }
    }
}

/// Single pass over a page's operators.
fn analyze(
    doc: &Document,
    resources: &Dictionary,
    operations: &[Operation],
    config: &WatermarkConfig,
) -> PageAnalysis {
    let mut analysis = PageAnalysis::default();
    let mut state = GraphicsState::default();
    let mut stack: Vec<GraphicsState> = Vec::new();
    let mut block: Option<OpenBlock> = None;

    for (index, op) in operations.iter().enumerate() {
        match op.operator.as_str() {
            "q" => stack.push(state.clone()),
            "Q" => {
                if let Some(saved) = stack.pop() {
                    state = saved;
                }
            }
            "cm" => {
                if is_rotated(&op.operands, config.min_rotation) {
                    state.rotated = true;
                }
            }
            "gs" => {
                let params = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| objects::resource_entry(doc, resources, b"ExtGState", name))
                    .and_then(|obj| objects::as_dictionary(doc, obj));
                if let Some(params) = params {
                    if let Some(ca) = params.get(b"ca").ok().and_then(objects::number) {
                        state.fill_alpha = ca;
                    }
                    if let Some(ca) = params.get(b"CA").ok().and_then(objects::number) {
                        state.stroke_alpha = ca;
                    }
                }
            }
            "Tr" => {
                if let Some(mode) = op.operands.first().and_then(|o| o.as_i64().ok()) {
                    state.render_mode = mode;
                }
            }
            "BT" => {
                block = Some(OpenBlock {
                    start: index,
                    fragments: Vec::new(),
                    shows: 0,
                    low_shows: 0,
                    rotated: state.rotated,
                });
            }
            "Tm" => {
                if let Some(open) = block.as_mut() {
                    open.rotated =
                        state.rotated || is_rotated(&op.operands, config.min_rotation);
                }
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if let Some(open) = block.as_mut() {
                    open.shows += 1;
                    if is_low_alpha(&state, config.max_opacity) {
                        open.low_shows += 1;
                    }
                    if let Some(text) = objects::shown_text(op) {
                        open.fragments.push(text);
                    }
                }
            }
            "ET" => {
                if let Some(open) = block.take() {
                    analysis.blocks.push(TextBlock {
                        start: open.start,
                        end: index,
                        text: objects::join_fragments(open.fragments),
                        rotated: open.rotated,
                        low_alpha: open.shows > 0 && open.low_shows == open.shows,
                    });
                }
            }
            "Do" => {
                let xobject = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| objects::resource_entry(doc, resources, b"XObject", name));
                let tagged =
                    xobject.is_some_and(|obj| is_tagged_xobject(doc, obj, config.named_layers));
                analysis.draws.push(XObjectDraw {
                    index,
                    tagged,
                    low_alpha: state.fill_alpha < 1.0 && state.fill_alpha <= config.max_opacity,
                });
            }
            "BDC" if config.named_layers => {
                if is_watermark_section(doc, resources, &op.operands) {
                    analysis.sections.push(Section {
                        start: index,
                        end: matching_emc(operations, index),
                    });
                }
            }
            _ => {}
        }
    }

    analysis
}

/// Whether text drawn in this state is faint enough to be a watermark.
fn is_low_alpha(state: &GraphicsState, max_opacity: f32) -> bool {
    let alpha = match state.render_mode {
        // invisible text, typically an OCR layer
        3 | 7 => return false,
        1 | 5 => state.stroke_alpha,
        _ => state.fill_alpha,
    };
    alpha < 1.0 && alpha <= max_opacity
}

/// Whether a `cm`/`Tm` matrix rotates by at least `min_sine`.
fn is_rotated(operands: &[Object], min_sine: f32) -> bool {
    let values: Vec<f32> = operands.iter().filter_map(objects::number).collect();
    let &[a, b, c, d, ..] = values.as_slice() else {
        return false;
    };
    let sine = |x: f32, y: f32| {
        let norm = x.hypot(y);
        if norm > 0.0 { y.abs() / norm } else { 0.0 }
    };
    sine(a, b).max(sine(d, c)) >= min_sine
}

fn matching_emc(operations: &[Operation], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (index, op) in operations.iter().enumerate().skip(start) {
        match op.operator.as_str() {
            "BMC" | "BDC" => depth += 1,
            "EMC" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// `/Artifact <</Subtype /Watermark>> BDC` or `/OC /name BDC` on a layer
/// named as a watermark.
fn is_watermark_section(doc: &Document, resources: &Dictionary, operands: &[Object]) -> bool {
    let Some(tag) = operands.first().and_then(|o| o.as_name().ok()) else {
        return false;
    };
    let properties = match operands.get(1) {
        Some(Object::Name(name)) => objects::resource_entry(doc, resources, b"Properties", name)
            .and_then(|obj| objects::as_dictionary(doc, obj)),
        Some(obj) => objects::as_dictionary(doc, obj),
        None => None,
    };
    let Some(properties) = properties else {
        return false;
    };

    match tag {
        b"Artifact" => has_name(properties, b"Subtype", b"Watermark"),
        b"OC" => is_watermark_layer(doc, properties),
        _ => false,
    }
}

/// An optional-content group, or membership dictionary, naming a watermark.
fn is_watermark_layer(doc: &Document, dict: &Dictionary) -> bool {
    if let Ok(name) = dict.get(b"Name") {
        if let Ok((_, Object::String(bytes, _))) = doc.dereference(name) {
            if objects::decode_text(bytes)
                .to_lowercase()
                .contains("watermark")
            {
                return true;
            }
        }
    }
    let Ok(groups) = dict.get(b"OCGs") else {
        return false;
    };
    match doc.dereference(groups) {
        Ok((_, Object::Array(items))) => items
            .iter()
            .filter_map(|item| objects::as_dictionary(doc, item))
            .any(|group| is_watermark_layer(doc, group)),
        Ok((_, Object::Dictionary(group))) => group.has(b"Name") && is_watermark_layer(doc, group),
        _ => false,
    }
}

/// Form XObject carrying Acrobat's watermark marker or a watermark layer.
fn is_tagged_xobject(doc: &Document, xobject: &Object, check_layers: bool) -> bool {
    let Object::Stream(stream) = xobject else {
        return false;
    };
    let dict = &stream.dict;

    let compound_type = dict
        .get(b"PieceInfo")
        .ok()
        .and_then(|obj| objects::as_dictionary(doc, obj))
        .and_then(|info| info.get(b"ADBE_CompoundType").ok())
        .and_then(|obj| objects::as_dictionary(doc, obj))
        .and_then(|compound| compound.get(b"Private").ok());
    let marked = match compound_type {
        Some(Object::Name(name)) => name == b"Watermark",
        Some(Object::String(bytes, _)) => bytes == b"Watermark",
        _ => false,
    };
    if marked {
        return true;
    }

    check_layers
        && dict
            .get(b"OC")
            .ok()
            .and_then(|obj| objects::as_dictionary(doc, obj))
            .is_some_and(|layer| is_watermark_layer(doc, layer))
}

fn is_watermark_annotation(doc: &Document, annotation: &Object) -> bool {
    objects::as_dictionary(doc, annotation)
        .is_some_and(|dict| has_name(dict, b"Subtype", b"Watermark"))
}

fn has_name(dict: &Dictionary, key: &[u8], expected: &[u8]) -> bool {
    dict.get(key)
        .ok()
        .and_then(|o| o.as_name().ok())
        .is_some_and(|name| name == expected)
}

/// Rotated text found on every page.
fn repeated_rotated_text(
    doc: &Document,
    page_ids: &[ObjectId],
    config: &WatermarkConfig,
) -> HashSet<String> {
    let mut common: Option<HashSet<String>> = None;
    for &page_id in page_ids {
        let operations = page_operations(doc, page_id).unwrap_or_default();
        let resources = objects::page_resources(doc, page_id).unwrap_or_default();
        let texts: HashSet<String> = analyze(doc, &resources, &operations, config)
            .blocks
            .into_iter()
            .filter(|block| block.rotated && !block.text.is_empty())
            .map(|block| block.text)
            .collect();

        let narrowed = match common {
            Some(previous) => previous.intersection(&texts).cloned().collect(),
            None => texts,
        };
        if narrowed.is_empty() {
            return HashSet::new();
        }
        common = Some(narrowed);
    }
    common.unwrap_or_default()
}
