//! Combines per-member card images into a single multi-page PDF (spec.md
//! §4.5 "Assembler"). Writes to a temp file and hands the path back; the
//! registration orchestrator owns deletion once the mailer has read it
//! (spec.md §5: temporary files are "owned exclusively by the orchestrator
//! that created them").

use image::{DynamicImage, RgbaImage};
use printpdf::{Image, ImageTransform, Mm, PdfDocument};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const MM_PER_PX_AT_300DPI: f32 = 25.4 / 300.0;

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("no cards to assemble")]
    Empty,
    #[error("io error writing document: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes one page per card, in member-index order, to `output_dir/{team_id}.pdf`.
pub fn assemble_document(
    team_id: &str,
    output_dir: &Path,
    cards: &[RgbaImage],
) -> Result<PathBuf, AssembleError> {
    let Some(first) = cards.first() else {
        return Err(AssembleError::Empty);
    };

    let width_mm = Mm(first.width() as f32 * MM_PER_PX_AT_300DPI);
    let height_mm = Mm(first.height() as f32 * MM_PER_PX_AT_300DPI);

    let (doc, page1, layer1) =
        PdfDocument::new(format!("{team_id} ID cards"), width_mm, height_mm, "cards");
    let mut page_layers = vec![(page1, layer1)];

    for _ in 1..cards.len() {
        let (page, layer) = doc.add_page(width_mm, height_mm, "cards");
        page_layers.push((page, layer));
    }

    for (card, (page_idx, layer_idx)) in cards.iter().zip(page_layers.iter()) {
        let layer = doc.get_page(*page_idx).get_layer(*layer_idx);
        let image = Image::from_dynamic_image(&DynamicImage::ImageRgba8(card.clone()));
        image.add_to_layer(layer, ImageTransform::default());
    }

    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{team_id}.pdf"));
    let mut writer = BufWriter::new(std::fs::File::create(&path)?);
    doc.save(&mut writer)
        .map_err(|e| AssembleError::Io(std::io::Error::other(e.to_string())))?;

    Ok(path)
}
