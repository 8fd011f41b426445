const SCREEN_CLASSES: &[(u32, &str)] = &[
    (5120, "UHD 5K"),
    (3840, "UHD 4K"),
    (2560, "WQHD"),
    (1920, "Full HD"),
    (1280, "HD"),
    (1024, "XL"),
    (800, "L"),
    (600, "M"),
    (415, "S"),
];

/// Map a screen width in pixels to its screen class. A width of zero has no class.
pub fn screen_class(width: u32) -> &'static str {
    if width == 0 {
        return "";
    }
    SCREEN_CLASSES
        .iter()
        .find(|(min, _)| width >= *min)
        .map(|(_, class)| *class)
        .unwrap_or("XS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_class_boundaries() {
        assert_eq!(screen_class(0), "");
        assert_eq!(screen_class(320), "XS");
        assert_eq!(screen_class(415), "S");
        assert_eq!(screen_class(1024), "XL");
        assert_eq!(screen_class(1919), "HD");
        assert_eq!(screen_class(1920), "Full HD");
        assert_eq!(screen_class(3840), "UHD 4K");
        assert_eq!(screen_class(7680), "UHD 5K");
    }
}
