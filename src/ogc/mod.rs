pub mod expand;
pub mod names;
pub mod xml;

use std::collections::BTreeMap;

/// OWS request parameters with upper-cased keys.
pub type Params = BTreeMap<String, String>;

/// Normalize parameter keys to upper case, last occurrence wins.
pub fn normalize_params<I, K, V>(pairs: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_uppercase(), v.into()))
        .collect()
}

/// Deduce the GetPrint map name by looking for a parameter ending in `:EXTENT`.
///
/// Looking for `:LAYERS` would be wrong since external layer definitions add
/// parameters like `A:LAYERS`.
pub fn map_param_prefix(params: &Params) -> Option<String> {
    params
        .keys()
        .find_map(|key| key.strip_suffix(":EXTENT").map(|p| p.to_string()))
}

/// OGC protocol selected by the SERVICE parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Wms,
    Wfs,
}

impl Protocol {
    pub fn from_service(service: &str) -> Option<Self> {
        match service.to_uppercase().as_str() {
            "WMS" => Some(Protocol::Wms),
            "WFS" => Some(Protocol::Wfs),
            _ => None,
        }
    }
}

/// Supported WMS request verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmsVerb {
    GetCapabilities,
    GetProjectSettings,
    GetMap,
    GetFeatureInfo,
    GetLegendGraphic,
    DescribeLayer,
    GetStyle,
    GetStyles,
    GetPrint,
    GetSchemaExtension,
    GetTranslations,
}

impl WmsVerb {
    pub fn parse(request: &str) -> Option<Self> {
        match request.to_uppercase().as_str() {
            "GETCAPABILITIES" => Some(Self::GetCapabilities),
            "GETPROJECTSETTINGS" => Some(Self::GetProjectSettings),
            "GETMAP" => Some(Self::GetMap),
            "GETFEATUREINFO" => Some(Self::GetFeatureInfo),
            // QGIS legacy request name GETLEGENDGRAPHICS
            "GETLEGENDGRAPHIC" | "GETLEGENDGRAPHICS" => Some(Self::GetLegendGraphic),
            "DESCRIBELAYER" => Some(Self::DescribeLayer),
            "GETSTYLE" => Some(Self::GetStyle),
            "GETSTYLES" => Some(Self::GetStyles),
            "GETPRINT" => Some(Self::GetPrint),
            "GETSCHEMAEXTENSION" => Some(Self::GetSchemaExtension),
            "GETTRANSLATIONS" => Some(Self::GetTranslations),
            _ => None,
        }
    }

    /// Canonical upper-case request name, as used in exception reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetCapabilities => "GETCAPABILITIES",
            Self::GetProjectSettings => "GETPROJECTSETTINGS",
            Self::GetMap => "GETMAP",
            Self::GetFeatureInfo => "GETFEATUREINFO",
            Self::GetLegendGraphic => "GETLEGENDGRAPHIC",
            Self::DescribeLayer => "DESCRIBELAYER",
            Self::GetStyle => "GETSTYLE",
            Self::GetStyles => "GETSTYLES",
            Self::GetPrint => "GETPRINT",
            Self::GetSchemaExtension => "GETSCHEMAEXTENSION",
            Self::GetTranslations => "GETTRANSLATIONS",
        }
    }

    /// Whether the backend response is piped through without filtering
    pub fn streamable(&self) -> bool {
        !matches!(
            self,
            Self::GetCapabilities
                | Self::GetProjectSettings
                | Self::GetFeatureInfo
                | Self::GetTranslations
        )
    }
}

/// Supported WFS request verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WfsVerb {
    GetCapabilities,
    DescribeFeatureType,
    GetFeature,
    Transaction,
}

impl WfsVerb {
    pub fn parse(request: &str) -> Option<Self> {
        match request.to_uppercase().as_str() {
            "GETCAPABILITIES" => Some(Self::GetCapabilities),
            "DESCRIBEFEATURETYPE" => Some(Self::DescribeFeatureType),
            "GETFEATURE" => Some(Self::GetFeature),
            "TRANSACTION" => Some(Self::Transaction),
            _ => None,
        }
    }

    /// Whether the backend response is piped through without filtering
    pub fn streamable(&self) -> bool {
        matches!(self, Self::Transaction)
    }
}
