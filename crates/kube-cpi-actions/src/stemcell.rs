//! Stemcell passthrough and CPI capability info
//!
//! There is no image registry to upload into: stemcells are container
//! images the cluster pulls itself, so the "stemcell" is just the
//! image reference carried through the cloud properties.

use serde_json::{json, Value};
use tracing::info;

use kube_cpi_common::{Error, Result};

use crate::props::StemcellCloudProperties;

/// Register a stemcell: the image reference is the stemcell ID
pub fn create_stemcell(image_path: &str, props: &StemcellCloudProperties) -> Result<String> {
    if props.image.is_empty() {
        return Err(Error::MissingStemcellImage);
    }

    info!(image = %props.image, tarball = %image_path, "registered stemcell image");
    Ok(props.image.clone())
}

/// Nothing to clean up: the image lives in its registry
pub fn delete_stemcell(stemcell_id: &str) {
    info!(stemcell_id = %stemcell_id, "delete stemcell is a no-op");
}

/// CPI capability advertisement
pub fn info() -> Value {
    json!({"stemcell_formats": "raw"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stemcell_id_is_the_image_reference() {
        let props = StemcellCloudProperties {
            image: "registry.example.com/bosh/stemcell:1234".to_string(),
        };
        let id = create_stemcell("/tmp/stemcell.tgz", &props).unwrap();
        assert_eq!(id, "registry.example.com/bosh/stemcell:1234");
    }

    #[test]
    fn stemcell_without_image_is_rejected() {
        assert!(create_stemcell("/tmp/x.tgz", &StemcellCloudProperties::default()).is_err());
    }

    #[test]
    fn info_advertises_raw_format() {
        assert_eq!(info()["stemcell_formats"], json!("raw"));
    }
}
