//! Static mapping between global LED indices and physical strips.

use crate::config::StripConfig;
use crate::lightshow::PatternKind;

/// One strip placed at a fixed offset in the concatenated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedStrip {
    pub id: u8,
    pub name: String,
    pub pattern: PatternKind,
    pub offset: usize,
    pub len: usize,
}

/// Strips concatenated in configured order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripLayout {
    strips: Vec<PlacedStrip>,
    total: usize,
}

impl StripLayout {
    #[must_use]
    pub fn new(strips: &[StripConfig]) -> Self {
        let mut offset = 0;
        let placed = strips
            .iter()
            .map(|s| {
                let len = usize::from(s.led_count);
                let strip = PlacedStrip {
                    id: s.id,
                    name: s.name.clone(),
                    pattern: s.pattern,
                    offset,
                    len,
                };
                offset += len;
                strip
            })
            .collect();
        Self {
            strips: placed,
            total: offset,
        }
    }

    #[must_use]
    pub fn strips(&self) -> &[PlacedStrip] {
        &self.strips
    }

    #[must_use]
    pub const fn total_leds(&self) -> usize {
        self.total
    }

    /// Map a global LED index to `(strip_id, local_index)`.
    ///
    /// Picks the last strip whose offset is `<= global`, so zero-length
    /// strips never capture an index.
    #[must_use]
    pub fn locate(&self, global: usize) -> Option<(u8, usize)> {
        if global >= self.total {
            return None;
        }
        let idx = self
            .strips
            .partition_point(|s| s.offset <= global)
            .checked_sub(1)?;
        let strip = &self.strips[idx];
        Some((strip.id, global - strip.offset))
    }

    /// Global index of a strip-local LED
    #[must_use]
    pub fn global_index(&self, strip_id: u8, local: usize) -> Option<usize> {
        self.strips
            .iter()
            .find(|s| s.id == strip_id && local < s.len)
            .map(|s| s.offset + local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> StripLayout {
        StripLayout::new(&[
            StripConfig::new(0, "main", 150, PatternKind::Spectrum),
            StripConfig::new(1, "left", 300, PatternKind::Wave),
            StripConfig::new(2, "right", 300, PatternKind::Pulse),
            StripConfig::new(3, "back", 300, PatternKind::Chase),
        ])
    }

    #[test]
    fn test_total_and_offsets() {
        let layout = reference();
        assert_eq!(layout.total_leds(), 1050);
        let offsets: Vec<usize> = layout.strips().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 150, 450, 750]);
    }

    #[test]
    fn test_locate_boundaries() {
        let layout = reference();
        assert_eq!(layout.locate(0), Some((0, 0)));
        assert_eq!(layout.locate(149), Some((0, 149)));
        assert_eq!(layout.locate(150), Some((1, 0)));
        assert_eq!(layout.locate(449), Some((1, 299)));
        assert_eq!(layout.locate(450), Some((2, 0)));
        assert_eq!(layout.locate(1049), Some((3, 299)));
        assert_eq!(layout.locate(1050), None);
    }

    #[test]
    fn test_global_index_inverts_locate() {
        let layout = reference();
        for global in [0, 42, 150, 777, 1049] {
            let (strip, local) = layout.locate(global).unwrap();
            assert_eq!(layout.global_index(strip, local), Some(global));
        }
        assert_eq!(layout.global_index(0, 150), None);
    }
}
