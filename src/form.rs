/*!
 * Form Extraction
 * One field view over multipart, urlencoded and JSON request bodies
 *
 * Nested JSON objects are flattened to `parent[child]` keys so the admin
 * forms (which post `address[city]`) and JSON clients read the same way.
 * Uploaded files are validated while the body is read; a bad file rejects
 * the request before any handler logic runs.
 */
use axum::{
    extract::{FromRef, FromRequest, Multipart, Request},
    http::header,
    Form, Json,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

use crate::error::{ApiError, ApiResult};
use crate::query::{names_non_finite, parse_flag};
use crate::uploads::ImageUpload;
use crate::AppState;

#[derive(Debug, Default, Clone)]
pub struct FormData {
    fields: Vec<(String, String)>,
    /// JSON-valued fields (arrays of objects, nested objects) by key.
    structured: Vec<(String, Value)>,
    files: Vec<(String, ImageUpload)>,
}

fn normalize_key(key: &str) -> &str {
    key.strip_suffix("[]").unwrap_or(key)
}

impl FormData {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let mut form = FormData::default();
        for (k, v) in pairs {
            form.push_text(k.into(), v.into());
        }
        form
    }

    pub fn from_json(value: Value) -> ApiResult<Self> {
        let Value::Object(map) = value else {
            return Err(ApiError::validation("Request body must be a JSON object"));
        };
        let mut form = FormData::default();
        for (key, value) in map {
            form.push_json(&key, value);
        }
        Ok(form)
    }

    fn push_text(&mut self, key: String, value: String) {
        let key = normalize_key(&key).to_string();
        self.fields.push((key, value));
    }

    fn push_json(&mut self, key: &str, value: Value) {
        match value {
            Value::Null => {}
            Value::String(s) => self.fields.push((key.to_string(), s)),
            Value::Bool(b) => self.fields.push((key.to_string(), b.to_string())),
            Value::Number(n) => self.fields.push((key.to_string(), n.to_string())),
            Value::Array(items) => {
                if items.iter().all(|v| !v.is_object() && !v.is_array()) {
                    for item in items.iter().cloned() {
                        self.push_json(key, item);
                    }
                }
                self.structured.push((key.to_string(), Value::Array(items)));
            }
            Value::Object(map) => {
                for (child, v) in map.iter() {
                    self.push_json(&format!("{}[{}]", key, child), v.clone());
                }
                self.structured.push((key.to_string(), Value::Object(map)));
            }
        }
    }

    pub fn push_file(&mut self, field: impl Into<String>, upload: ImageUpload) {
        let field = field.into();
        let field = normalize_key(&field).to_string();
        self.files.push((field, upload));
    }

    /// Whether the client sent the field at all (possibly empty).
    pub fn has(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
            || self.structured.iter().any(|(k, _)| k == key)
    }

    /// Raw value, untrimmed; `Some("")` when sent empty.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed value; `None` when absent or blank.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.raw(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn owned(&self, key: &str) -> Option<String> {
        self.text(key).map(str::to_string)
    }

    pub fn required(&self, key: &str) -> ApiResult<String> {
        self.owned(key)
            .ok_or_else(|| ApiError::validation(format!("{} is required", key)))
    }

    /// Typed value; blank is `None`, unparsable is a 400.
    pub fn parse<T: FromStr>(&self, key: &str) -> ApiResult<Option<T>> {
        match self.text(key) {
            None => Ok(None),
            Some(raw) if names_non_finite(raw) => {
                Err(ApiError::validation(format!("Invalid {}: {}", key, raw)))
            }
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::validation(format!("Invalid {}: {}", key, raw))),
        }
    }

    /// Like [`FormData::parse`], additionally refusing negative numbers.
    pub fn non_negative<T: FromStr + PartialOrd + Default>(&self, key: &str) -> ApiResult<Option<T>> {
        match self.parse::<T>(key)? {
            Some(v)
                if !matches!(
                    v.partial_cmp(&T::default()),
                    Some(Ordering::Greater | Ordering::Equal)
                ) =>
            {
                Err(ApiError::validation(format!("{} must not be negative", key)))
            }
            other => Ok(other),
        }
    }

    /// Enum-valued field whose `FromStr` error names the allowed values.
    pub fn choice<T: FromStr<Err = String>>(&self, key: &str) -> ApiResult<Option<T>> {
        self.text(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|e| ApiError::validation(format!("Invalid {}: {}", key, e)))
            })
            .transpose()
    }

    /// Checkbox-style boolean. An unchecked HTML checkbox is simply absent.
    pub fn flag(&self, key: &str) -> ApiResult<Option<bool>> {
        match self.text(key) {
            None => Ok(None),
            Some(raw) => parse_flag(raw)
                .map(Some)
                .ok_or_else(|| ApiError::validation(format!("Invalid {}: {}", key, raw))),
        }
    }

    /// Every value sent under `key` (or `key[]`), with comma-separated
    /// values split, trimmed and blanks dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Structured value: the JSON sent for `key`, or a form field holding a
    /// JSON document.
    pub fn json(&self, key: &str) -> ApiResult<Option<Value>> {
        if let Some((_, value)) = self.structured.iter().find(|(k, _)| k == key) {
            return Ok(Some(value.clone()));
        }
        match self.text(key) {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| ApiError::validation(format!("Invalid {}: {}", key, e))),
        }
    }

    /// Deserialize a structured field into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self, key: &str) -> ApiResult<Option<T>> {
        self.json(key)?
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| ApiError::validation(format!("Invalid {}: {}", key, e)))
            })
            .transpose()
    }

    // ------------------------------------------------------------------------
    // Merging into existing records: absent fields leave the target as is.
    // `creating` turns a missing required field into an error.
    // ------------------------------------------------------------------------

    pub fn merge_text(
        &self,
        key: &str,
        target: &mut String,
        required: bool,
        creating: bool,
    ) -> ApiResult<()> {
        if !self.has(key) {
            if creating && required {
                return Err(ApiError::validation(format!("{} is required", key)));
            }
            return Ok(());
        }
        match self.owned(key) {
            Some(value) => *target = value,
            None if required => {
                return Err(ApiError::validation(format!("{} is required", key)));
            }
            None => target.clear(),
        }
        Ok(())
    }

    pub fn merge_opt_text(&self, key: &str, target: &mut Option<String>) {
        if self.has(key) {
            *target = self.owned(key);
        }
    }

    pub fn merge_parsed<T: FromStr + PartialOrd + Default>(
        &self,
        key: &str,
        target: &mut T,
        required: bool,
        creating: bool,
    ) -> ApiResult<()> {
        match self.non_negative::<T>(key)? {
            Some(value) => *target = value,
            None if required && (creating || self.has(key)) => {
                return Err(ApiError::validation(format!("{} is required", key)));
            }
            None => {}
        }
        Ok(())
    }

    /// Optional non-negative number; sending it blank clears it.
    pub fn merge_opt_parsed<T: FromStr + PartialOrd + Default>(
        &self,
        key: &str,
        target: &mut Option<T>,
    ) -> ApiResult<()> {
        if self.has(key) {
            *target = self.non_negative(key)?;
        }
        Ok(())
    }

    pub fn merge_choice<T: FromStr<Err = String>>(
        &self,
        key: &str,
        target: &mut T,
        required: bool,
        creating: bool,
    ) -> ApiResult<()> {
        match self.choice::<T>(key)? {
            Some(value) => *target = value,
            None if required && (creating || self.has(key)) => {
                return Err(ApiError::validation(format!("{} is required", key)));
            }
            None => {}
        }
        Ok(())
    }

    pub fn merge_flag(&self, key: &str, target: &mut bool) -> ApiResult<()> {
        if let Some(value) = self.flag(key)? {
            *target = value;
        }
        Ok(())
    }

    pub fn merge_list(&self, key: &str, target: &mut Vec<String>) {
        if self.has(key) {
            *target = self.list(key);
        }
    }

    /// Optional reference to another record by id; blank clears it.
    pub fn merge_ref(&self, key: &str, target: &mut Option<uuid::Uuid>) -> ApiResult<()> {
        if self.has(key) {
            *target = self.parse::<uuid::Uuid>(key)?;
        }
        Ok(())
    }

    pub fn files(&self, field: &str) -> Vec<&ImageUpload> {
        self.files
            .iter()
            .filter(|(f, _)| f == field)
            .map(|(_, upload)| upload)
            .collect()
    }

    pub fn file(&self, field: &str) -> Option<&ImageUpload> {
        self.files
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, upload)| upload)
    }

    /// Field names and their text values, in arrival order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    async fn from_multipart(mut multipart: Multipart, max_file_bytes: usize) -> ApiResult<Self> {
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::validation(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::validation(format!("Failed to read upload: {}", e)))?;
                    // Browsers submit untouched file inputs as an empty part.
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    let upload = ImageUpload::validate(&file_name, bytes.to_vec(), max_file_bytes)?;
                    form.push_file(name, upload);
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ApiError::validation(format!("Failed to read field: {}", e)))?;
                    form.push_text(name, text);
                }
            }
        }
        Ok(form)
    }
}

impl<S> FromRequest<S> for FormData
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let max_file_bytes = AppState::from_ref(state).config.uploads.max_file_bytes;
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::validation(e.body_text()))?;
            FormData::from_multipart(multipart, max_file_bytes).await
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::validation(e.body_text()))?;
            Ok(FormData::from_pairs(pairs))
        } else if content_type.starts_with("application/json") {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| ApiError::validation(e.body_text()))?;
            FormData::from_json(value)
        } else if content_type.is_empty() {
            Ok(FormData::default())
        } else {
            Err(ApiError::validation(format!(
                "Unsupported content type: {}",
                content_type
            )))
        }
    }
}
