//! Per-member ID card rendering (spec.md §4.5).
//!
//! Member photos are out of scope (no upload/storage path exists in this
//! design), so every card uses the monogram placeholder the spec allows as
//! a fallback.

use ab_glyph::{FontRef, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_text_mut};
use qrcode::{EcLevel, QrCode};
use registrar_core::{Member, QrPayload, Team};
use time::OffsetDateTime;

const CARD_WIDTH: u32 = 1011; // 85.6mm at 300dpi, CR80 card proportions
const CARD_HEIGHT: u32 = 638; // 54mm at 300dpi
const QR_MODULE_PX: u32 = 6; // keeps a 29-module L1 code comfortably over 17mm printed
const MOTIVATIONAL_CAPTIONS: &[&str] = &[
    "Build something you'd be proud to ship.",
    "Every great hack starts with a bad first commit.",
    "Ship it, then make it beautiful.",
    "Code like someone else will read it tomorrow.",
    "The best time to start was an hour ago. The next best is now.",
];

#[derive(Debug, Clone)]
pub struct CardTheme {
    pub institution_banner: String,
    pub event_title: String,
    pub font_bytes: Vec<u8>,
}

pub struct CardRenderer<'a> {
    theme: &'a CardTheme,
    font: FontRef<'a>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to load card font: {0}")]
    Font(String),
    #[error("failed to encode qr payload: {0}")]
    Qr(#[from] qrcode::types::QrError),
}

impl<'a> CardRenderer<'a> {
    pub fn new(theme: &'a CardTheme) -> Result<Self, RenderError> {
        let font = FontRef::try_from_slice(&theme.font_bytes)
            .map_err(|e| RenderError::Font(e.to_string()))?;
        Ok(Self { theme, font })
    }

    /// Renders one member's card. `caption_seed` picks the motivational
    /// caption deterministically (e.g. the member's index) so repeated
    /// renders of the same card are identical.
    pub fn render(
        &self,
        team: &Team,
        member: &Member,
        caption_seed: usize,
    ) -> Result<RgbaImage, RenderError> {
        let mut canvas = RgbaImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, Rgba([255, 255, 255, 255]));

        self.draw_header(&mut canvas);
        self.draw_monogram(&mut canvas, &member.name);
        self.draw_member_details(&mut canvas, team, member);
        self.draw_caption(&mut canvas, caption_seed);
        self.draw_qr(&mut canvas, team, member)?;

        Ok(canvas)
    }

    fn draw_header(&self, canvas: &mut RgbaImage) {
        let navy = Rgba([22, 40, 80, 255]);
        draw_text_mut(
            canvas,
            navy,
            32,
            20,
            PxScale::from(26.0),
            &self.font,
            &self.theme.institution_banner,
        );
        draw_text_mut(
            canvas,
            navy,
            32,
            54,
            PxScale::from(34.0),
            &self.font,
            &self.theme.event_title,
        );
    }

    fn draw_monogram(&self, canvas: &mut RgbaImage, name: &str) {
        let center = (110, 220);
        draw_filled_circle_mut(canvas, center, 70, Rgba([22, 40, 80, 255]));
        let initials: String = name
            .split_whitespace()
            .filter_map(|w| w.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase();
        draw_text_mut(
            canvas,
            Rgba([255, 255, 255, 255]),
            center.0 - 38,
            center.1 - 30,
            PxScale::from(48.0),
            &self.font,
            &initials,
        );
    }

    fn draw_member_details(&self, canvas: &mut RgbaImage, team: &Team, member: &Member) {
        let black = Rgba([10, 10, 10, 255]);
        let lines = [
            member.name.clone(),
            member.phone.clone(),
            format!("{} — Year {}", team.college_name, team.year),
            team.domain.clone(),
            team.team_name.clone(),
            team.team_id.clone(),
        ];
        let mut y = 150;
        for line in lines {
            draw_text_mut(canvas, black, 230, y, PxScale::from(22.0), &self.font, &line);
            y += 34;
        }

        draw_text_mut(
            canvas,
            Rgba([22, 40, 80, 255]),
            230,
            y + 10,
            PxScale::from(30.0),
            &self.font,
            &team.team_code,
        );

        // machine-readable fallback for when the QR can't be scanned
        draw_text_mut(
            canvas,
            black,
            230,
            CARD_HEIGHT as i32 - 40,
            PxScale::from(18.0),
            &self.font,
            &member.participant_id,
        );
    }

    fn draw_caption(&self, canvas: &mut RgbaImage, seed: usize) {
        let caption = MOTIVATIONAL_CAPTIONS[seed % MOTIVATIONAL_CAPTIONS.len()];
        draw_text_mut(
            canvas,
            Rgba([90, 90, 90, 255]),
            32,
            CARD_HEIGHT as i32 - 70,
            PxScale::from(16.0),
            &self.font,
            caption,
        );
    }

    fn draw_qr(
        &self,
        canvas: &mut RgbaImage,
        team: &Team,
        member: &Member,
    ) -> Result<(), RenderError> {
        let payload = QrPayload {
            team_code: team.team_code.clone(),
            participant_id: member.participant_id.clone(),
            participant_name: member.name.clone(),
            is_team_leader: member.is_team_leader,
            timestamp: OffsetDateTime::now_utc(),
        };
        let encoded = serde_json::to_string(&payload).expect("QrPayload always serializes");

        // High error correction (spec.md §4.5: "~30% redundancy") so print
        // wear or a smudge doesn't make the code unscannable.
        let qr = QrCode::with_error_correction_level(encoded.as_bytes(), EcLevel::H)?;
        let qr_image = qr
            .render::<image::Luma<u8>>()
            .quiet_zone(true)
            .module_dimensions(QR_MODULE_PX, QR_MODULE_PX)
            .build();

        let (qx, qy) = (CARD_WIDTH - qr_image.width() - 32, 150);
        for (x, y, pixel) in qr_image.enumerate_pixels() {
            let value = pixel.0[0];
            if value < 128 {
                canvas.put_pixel(qx + x, qy + y, Rgba([0, 0, 0, 255]));
            }
        }

        Ok(())
    }
}
