/// Class names in the order the PPE model was trained with.
///
/// The model only emits indices; a reordering here silently mislabels every
/// detection, so this list must track the training config exactly.
pub const CLASS_NAMES: [&str; 10] = [
    "boots",
    "gloves",
    "goggles",
    "helmet",
    "no-boots",
    "no-gloves",
    "no-goggles",
    "no-helmet",
    "no-vest",
    "vest",
];

pub fn class_name(index: usize) -> Option<&'static str> {
    CLASS_NAMES.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_indices_in_training_order() {
        assert_eq!(class_name(0), Some("boots"));
        assert_eq!(class_name(3), Some("helmet"));
        assert_eq!(class_name(9), Some("vest"));
        assert_eq!(class_name(10), None);
    }
}
