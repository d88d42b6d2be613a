//! Drive identity types
//!
//! This module provides strongly-typed wrappers for drive and item
//! identifiers. Each newtype normalizes or validates its value at
//! construction time so the rest of the engine can compare identities
//! by plain equality.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// DriveId
// ============================================================================

/// Minimum canonical length of a drive identifier.
///
/// Personal OneDrive drives use short hexadecimal IDs which the Graph API
/// sometimes reports with and sometimes without leading zeros. Padding to a
/// fixed minimum width makes the two spellings compare equal.
const DRIVE_ID_MIN_LEN: usize = 16;

/// A normalized OneDrive drive identifier
///
/// Normalization rules:
/// - lowercase
/// - leading zeros stripped, then left-padded with `0` to at least 16 chars
///
/// Under these rules `ABC`, `0000000000000abc` and `000000000000000abc`
/// all produce the same value. The all-zero value is the distinguished
/// "zero drive" (also produced by the empty string) and can be detected
/// with [`DriveId::is_zero`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DriveId(String);

impl DriveId {
    /// Create a normalized DriveId from any spelling of the identifier
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        let stripped = lowered.trim_start_matches('0');
        if stripped.len() >= DRIVE_ID_MIN_LEN {
            Self(stripped.to_string())
        } else {
            Self(format!("{:0>width$}", stripped, width = DRIVE_ID_MIN_LEN))
        }
    }

    /// The distinguished zero drive (no drive)
    #[must_use]
    pub fn zero() -> Self {
        Self("0".repeat(DRIVE_ID_MIN_LEN))
    }

    /// Returns true if this is the zero drive
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    /// Get the canonical string form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DriveId {
    fn default() -> Self {
        Self::zero()
    }
}

impl Display for DriveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DriveId {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<DriveId> for String {
    fn from(id: DriveId) -> Self {
        id.0
    }
}

impl FromStr for DriveId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ============================================================================
// ItemId
// ============================================================================

/// A OneDrive item identifier (opaque alphanumeric string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Create a new ItemId
    ///
    /// # Errors
    /// Returns an error if the ID is empty or contains characters OneDrive
    /// never emits in item identifiers.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidItemId(
                "item ID cannot be empty".to_string(),
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '!' || c == '-' || c == '_' || c == '.')
        {
            return Err(DomainError::InvalidItemId(format!(
                "item ID contains invalid characters: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

// ============================================================================
// ItemKey
// ============================================================================

/// Primary key of an item: the pair `(DriveId, ItemId)`
///
/// Items keep their key across renames and moves, which is what makes
/// move detection possible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub drive_id: DriveId,
    pub item_id: ItemId,
}

impl ItemKey {
    /// Create a new ItemKey
    #[must_use]
    pub fn new(drive_id: DriveId, item_id: ItemId) -> Self {
        Self { drive_id, item_id }
    }
}

impl Display for ItemKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.drive_id, self.item_id)
    }
}

// ============================================================================
// Email
// ============================================================================

/// Validated email address (basic structural validation)
///
/// Stored lowercase so drives configured with differing case still map to
/// the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Create a new validated Email
    ///
    /// # Errors
    /// Returns an error if the email is structurally invalid.
    pub fn new(email: impl Into<String>) -> Result<Self, DomainError> {
        let email = email.into();
        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(DomainError::InvalidEmail(format!(
                "email must have the form local@domain: {email}"
            )));
        }
        if !parts[1].contains('.') {
            return Err(DomainError::InvalidEmail(format!(
                "email domain must contain a dot: {email}"
            )));
        }
        Ok(Self(email.to_lowercase()))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Email {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

// ============================================================================
// DriveType
// ============================================================================

/// The closed set of drive kinds that can appear in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveType {
    /// Personal (consumer) OneDrive
    Personal,
    /// OneDrive for Business
    Business,
    /// SharePoint document library
    SharePoint,
    /// A folder shared into this account from another drive
    Shared,
}

impl DriveType {
    /// The configuration-surface spelling of this drive type
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveType::Personal => "personal",
            DriveType::Business => "business",
            DriveType::SharePoint => "sharepoint",
            DriveType::Shared => "shared",
        }
    }

    /// The drive type used for token-file lookup
    ///
    /// SharePoint libraries authenticate with the business token, so they
    /// map to [`DriveType::Business`] here.
    #[must_use]
    pub fn token_type(&self) -> DriveType {
        match self {
            DriveType::SharePoint => DriveType::Business,
            other => *other,
        }
    }
}

impl Display for DriveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DriveType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(DriveType::Personal),
            "business" => Ok(DriveType::Business),
            "sharepoint" => Ok(DriveType::SharePoint),
            "shared" => Ok(DriveType::Shared),
            other => Err(DomainError::InvalidDriveType(other.to_string())),
        }
    }
}

// ============================================================================
// CanonicalDriveId
// ============================================================================

/// A canonical configuration identifier for a drive
///
/// String grammar (colon-separated):
/// - `personal:email` (exactly 2 parts)
/// - `business:email` (exactly 2 parts)
/// - `sharepoint:email[:site[:library]]` (2 to 4 parts)
/// - `shared:email:sourceDriveID:sourceItemID` (exactly 4 parts,
///   source parts non-empty)
///
/// `parse(to_string(x)) == x` holds for every valid form; malformed input
/// is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalDriveId {
    drive_type: DriveType,
    email: Email,
    /// SharePoint site name (sharepoint only)
    site: Option<String>,
    /// SharePoint document library (sharepoint only, requires site)
    library: Option<String>,
    /// Source drive of a shared folder (shared only)
    source_drive: Option<DriveId>,
    /// Source item of a shared folder (shared only)
    source_item: Option<ItemId>,
}

impl CanonicalDriveId {
    /// Create a personal drive identifier
    #[must_use]
    pub fn personal(email: Email) -> Self {
        Self {
            drive_type: DriveType::Personal,
            email,
            site: None,
            library: None,
            source_drive: None,
            source_item: None,
        }
    }

    /// Create a business drive identifier
    #[must_use]
    pub fn business(email: Email) -> Self {
        Self {
            drive_type: DriveType::Business,
            email,
            site: None,
            library: None,
            source_drive: None,
            source_item: None,
        }
    }

    /// Create a SharePoint drive identifier
    ///
    /// # Errors
    /// Returns an error if a library is given without a site.
    pub fn sharepoint(
        email: Email,
        site: Option<String>,
        library: Option<String>,
    ) -> Result<Self, DomainError> {
        if library.is_some() && site.is_none() {
            return Err(DomainError::InvalidCanonicalId(
                "sharepoint library requires a site".to_string(),
            ));
        }
        Ok(Self {
            drive_type: DriveType::SharePoint,
            email,
            site,
            library,
            source_drive: None,
            source_item: None,
        })
    }

    /// Create a shared-folder drive identifier
    #[must_use]
    pub fn shared(email: Email, source_drive: DriveId, source_item: ItemId) -> Self {
        Self {
            drive_type: DriveType::Shared,
            email,
            site: None,
            library: None,
            source_drive: Some(source_drive),
            source_item: Some(source_item),
        }
    }

    /// The drive type
    #[must_use]
    pub fn drive_type(&self) -> DriveType {
        self.drive_type
    }

    /// The account email
    #[must_use]
    pub fn email(&self) -> &Email {
        &self.email
    }

    /// SharePoint site, when present
    #[must_use]
    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    /// SharePoint library, when present
    #[must_use]
    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    /// Source drive of a shared folder, when present
    #[must_use]
    pub fn source_drive(&self) -> Option<&DriveId> {
        self.source_drive.as_ref()
    }

    /// Source item of a shared folder, when present
    #[must_use]
    pub fn source_item(&self) -> Option<&ItemId> {
        self.source_item.as_ref()
    }

    /// The token-file name for this drive: `token_{type}_{email}.json`
    ///
    /// SharePoint drives map to the business token file.
    #[must_use]
    pub fn token_file_name(&self) -> String {
        format!(
            "token_{}_{}.json",
            self.drive_type.token_type().as_str(),
            self.email.as_str()
        )
    }
}

impl Display for CanonicalDriveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.drive_type, self.email)?;
        match self.drive_type {
            DriveType::SharePoint => {
                if let Some(site) = &self.site {
                    write!(f, ":{site}")?;
                    if let Some(library) = &self.library {
                        write!(f, ":{library}")?;
                    }
                }
                Ok(())
            }
            DriveType::Shared => {
                // Constructors guarantee both source parts are present.
                write!(
                    f,
                    ":{}:{}",
                    self.source_drive.as_ref().map_or("", |d| d.as_str()),
                    self.source_item.as_ref().map_or("", |i| i.as_str())
                )
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for CanonicalDriveId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 {
            return Err(DomainError::InvalidCanonicalId(format!(
                "expected type:email, got: {s}"
            )));
        }

        let drive_type: DriveType = parts[0].parse()?;
        let email = Email::new(parts[1])?;

        match drive_type {
            DriveType::Personal | DriveType::Business => {
                if parts.len() != 2 {
                    return Err(DomainError::InvalidCanonicalId(format!(
                        "{drive_type} drives take exactly 2 parts: {s}"
                    )));
                }
                Ok(if drive_type == DriveType::Personal {
                    Self::personal(email)
                } else {
                    Self::business(email)
                })
            }
            DriveType::SharePoint => {
                if parts.len() > 4 {
                    return Err(DomainError::InvalidCanonicalId(format!(
                        "sharepoint drives take at most 4 parts: {s}"
                    )));
                }
                let site = parts.get(2).map(|p| p.to_string()).filter(|p| !p.is_empty());
                let library = parts.get(3).map(|p| p.to_string()).filter(|p| !p.is_empty());
                if parts.len() >= 3 && site.is_none() {
                    return Err(DomainError::InvalidCanonicalId(format!(
                        "sharepoint site cannot be empty: {s}"
                    )));
                }
                if parts.len() == 4 && library.is_none() {
                    return Err(DomainError::InvalidCanonicalId(format!(
                        "sharepoint library cannot be empty: {s}"
                    )));
                }
                Self::sharepoint(email, site, library)
            }
            DriveType::Shared => {
                if parts.len() != 4 {
                    return Err(DomainError::InvalidCanonicalId(format!(
                        "shared drives take exactly 4 parts: {s}"
                    )));
                }
                if parts[2].is_empty() || parts[3].is_empty() {
                    return Err(DomainError::InvalidCanonicalId(format!(
                        "shared source drive and item must be non-empty: {s}"
                    )));
                }
                let source_drive = DriveId::new(parts[2]);
                let source_item = ItemId::new(parts[3])?;
                Ok(Self::shared(email, source_drive, source_item))
            }
        }
    }
}

impl TryFrom<String> for CanonicalDriveId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CanonicalDriveId> for String {
    fn from(id: CanonicalDriveId) -> Self {
        id.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod drive_id_tests {
        use super::*;

        #[test]
        fn test_lowercase_and_pad() {
            let id = DriveId::new("ABC");
            assert_eq!(id.as_str(), "0000000000000abc");
        }

        #[test]
        fn test_spellings_compare_equal() {
            let a = DriveId::new("ABC");
            let b = DriveId::new("000000000000000abc");
            let c = DriveId::new("0000000000000abc");
            assert_eq!(a, b);
            assert_eq!(b, c);
            assert!(!a.is_zero());
        }

        #[test]
        fn test_equal_as_map_keys() {
            use std::collections::HashMap;
            let mut map = HashMap::new();
            map.insert(DriveId::new("ABC"), 1);
            map.insert(DriveId::new("0000000000000abc"), 2);
            map.insert(DriveId::new("000000000000000abc"), 3);
            assert_eq!(map.len(), 1);
        }

        #[test]
        fn test_long_id_unpadded() {
            let raw = "b!aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789aBcDeFgHiJ";
            let id = DriveId::new(raw);
            assert_eq!(id.as_str(), raw.to_lowercase());
        }

        #[test]
        fn test_zero_values() {
            assert!(DriveId::new("").is_zero());
            assert!(DriveId::new("0000000000000000").is_zero());
            assert_eq!(DriveId::new(""), DriveId::zero());
            assert_eq!(DriveId::new("0000000000000000"), DriveId::zero());
        }

        #[test]
        fn test_serde_roundtrip() {
            let id = DriveId::new("ABC");
            let json = serde_json::to_string(&id).unwrap();
            let parsed: DriveId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, parsed);
        }
    }

    mod item_id_tests {
        use super::*;

        #[test]
        fn test_valid_id() {
            let id = ItemId::new("01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K").unwrap();
            assert_eq!(id.as_str(), "01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K");
        }

        #[test]
        fn test_empty_fails() {
            assert!(ItemId::new("").is_err());
        }

        #[test]
        fn test_invalid_chars_fail() {
            assert!(ItemId::new("bad id with spaces").is_err());
        }
    }

    mod item_key_tests {
        use super::*;

        #[test]
        fn test_key_equality_across_spellings() {
            let a = ItemKey::new(DriveId::new("ABC"), ItemId::new("ITEM1").unwrap());
            let b = ItemKey::new(
                DriveId::new("0000000000000abc"),
                ItemId::new("ITEM1").unwrap(),
            );
            assert_eq!(a, b);
        }
    }

    mod drive_type_tests {
        use super::*;

        #[test]
        fn test_parse_all_variants() {
            assert_eq!("personal".parse::<DriveType>().unwrap(), DriveType::Personal);
            assert_eq!("business".parse::<DriveType>().unwrap(), DriveType::Business);
            assert_eq!(
                "sharepoint".parse::<DriveType>().unwrap(),
                DriveType::SharePoint
            );
            assert_eq!("shared".parse::<DriveType>().unwrap(), DriveType::Shared);
        }

        #[test]
        fn test_unknown_rejected() {
            assert!("dropbox".parse::<DriveType>().is_err());
        }

        #[test]
        fn test_sharepoint_token_maps_to_business() {
            assert_eq!(DriveType::SharePoint.token_type(), DriveType::Business);
            assert_eq!(DriveType::Personal.token_type(), DriveType::Personal);
        }
    }

    mod canonical_id_tests {
        use super::*;

        fn email() -> Email {
            Email::new("user@example.com").unwrap()
        }

        #[test]
        fn test_personal_roundtrip() {
            let id = CanonicalDriveId::personal(email());
            assert_eq!(id.to_string(), "personal:user@example.com");
            let parsed: CanonicalDriveId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }

        #[test]
        fn test_business_roundtrip() {
            let id = CanonicalDriveId::business(email());
            let parsed: CanonicalDriveId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }

        #[test]
        fn test_sharepoint_two_three_four_part_roundtrips() {
            let two = CanonicalDriveId::sharepoint(email(), None, None).unwrap();
            let three =
                CanonicalDriveId::sharepoint(email(), Some("engineering".to_string()), None)
                    .unwrap();
            let four = CanonicalDriveId::sharepoint(
                email(),
                Some("engineering".to_string()),
                Some("Documents".to_string()),
            )
            .unwrap();

            for id in [two, three, four] {
                let parsed: CanonicalDriveId = id.to_string().parse().unwrap();
                assert_eq!(parsed, id, "round trip failed for {id}");
            }
        }

        #[test]
        fn test_shared_roundtrip() {
            let id = CanonicalDriveId::shared(
                email(),
                DriveId::new("ABCDEF0123456789"),
                ItemId::new("ITEM42").unwrap(),
            );
            assert_eq!(
                id.to_string(),
                "shared:user@example.com:abcdef0123456789:ITEM42"
            );
            let parsed: CanonicalDriveId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }

        #[test]
        fn test_personal_with_extra_parts_rejected() {
            assert!("personal:user@example.com:extra"
                .parse::<CanonicalDriveId>()
                .is_err());
        }

        #[test]
        fn test_shared_requires_four_nonempty_parts() {
            assert!("shared:user@example.com".parse::<CanonicalDriveId>().is_err());
            assert!("shared:user@example.com:drive"
                .parse::<CanonicalDriveId>()
                .is_err());
            assert!("shared:user@example.com::item"
                .parse::<CanonicalDriveId>()
                .is_err());
            assert!("shared:user@example.com:drive:"
                .parse::<CanonicalDriveId>()
                .is_err());
        }

        #[test]
        fn test_sharepoint_five_parts_rejected() {
            assert!("sharepoint:user@example.com:site:lib:extra"
                .parse::<CanonicalDriveId>()
                .is_err());
        }

        #[test]
        fn test_library_without_site_rejected() {
            assert!(
                CanonicalDriveId::sharepoint(email(), None, Some("Documents".to_string()))
                    .is_err()
            );
        }

        #[test]
        fn test_bad_email_rejected() {
            assert!("personal:not-an-email".parse::<CanonicalDriveId>().is_err());
        }

        #[test]
        fn test_unknown_type_rejected() {
            assert!("gdrive:user@example.com".parse::<CanonicalDriveId>().is_err());
        }

        #[test]
        fn test_token_file_name() {
            let personal = CanonicalDriveId::personal(email());
            assert_eq!(
                personal.token_file_name(),
                "token_personal_user@example.com.json"
            );

            let sp = CanonicalDriveId::sharepoint(email(), Some("site".to_string()), None)
                .unwrap();
            assert_eq!(sp.token_file_name(), "token_business_user@example.com.json");
        }
    }
}
