//! Product image URL resolution.

use basket_core::ImageRef;
use url::Url;

use crate::config::with_trailing_slash;

/// Resolve an image reference against the image CDN.
///
/// Absolute references are returned as-is. Relative ones are joined onto
/// `cdn_base`; with no CDN configured they resolve to `None` and the page
/// renders no image.
#[must_use]
pub fn image_url(image: &ImageRef, cdn_base: Option<&Url>) -> Option<String> {
    if image.is_absolute() {
        return Some(image.as_str().to_string());
    }

    let base = with_trailing_slash(cdn_base?.clone());

    match base.join(image.as_str().trim_start_matches('/')) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            tracing::warn!(image = image.as_str(), error = %e, "Unresolvable image reference");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_reference_passes_through() {
        let image = ImageRef::new("https://images.example.net/a.png");
        assert_eq!(
            image_url(&image, None).as_deref(),
            Some("https://images.example.net/a.png")
        );
    }

    #[test]
    fn test_relative_reference_joins_cdn_path() {
        let base = Url::parse("https://cdn.example.net/images/production").unwrap();
        let image = ImageRef::new("/tee-front.png");
        assert_eq!(
            image_url(&image, Some(&base)).as_deref(),
            Some("https://cdn.example.net/images/production/tee-front.png")
        );
    }

    #[test]
    fn test_relative_reference_without_cdn_is_none() {
        assert!(image_url(&ImageRef::new("tee.png"), None).is_none());
    }
}
