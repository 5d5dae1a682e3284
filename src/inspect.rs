// Copyright 2023 Balázs Dukai, Ravi Peters
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Summarize the contents of a b3dm, for checking the result of `compact`.
use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

use crate::bulk::ProcessError;
use crate::compact::{AttributeEntry, ATTRIBUTES_KEY, LEGACY_YEAR_KEY, YEAR_KEY};
use crate::formats::b3dm::{B3dm, Header};

/// The number of years that are shown.
const SAMPLE_SIZE: usize = 10;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct YearStats {
    pub total: usize,
    /// Features with a year greater than zero.
    pub valid: usize,
    pub sample: Vec<i64>,
}

impl YearStats {
    pub fn valid_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub header: Header,
    pub glb_byte_length: usize,
    pub batch_table_keys: Vec<String>,
    pub first_attribute: Option<Value>,
    /// `None` if the batch table does not have an `attributes` array.
    pub years: Option<YearStats>,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// The construction year of a record, or 0.
/// Unlike the compaction, an empty primary year falls back to the legacy one.
pub fn year_of(record: &Map<String, Value>) -> i64 {
    let year = [YEAR_KEY, LEGACY_YEAR_KEY]
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| is_truthy(value));
    match year {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

pub fn year_stats(attributes: &[Value]) -> YearStats {
    let years: Vec<i64> = attributes
        .iter()
        .map(|entry| year_of(&AttributeEntry::from(entry.clone()).into_record()))
        .collect();
    let valid: Vec<i64> = years.iter().copied().filter(|y| *y > 0).collect();
    YearStats {
        total: years.len(),
        valid: valid.len(),
        sample: valid.into_iter().take(SAMPLE_SIZE).collect(),
    }
}

pub fn inspect(bytes: &[u8]) -> Result<Inspection, ProcessError> {
    let header = Header::parse(bytes)?;
    let b3dm = B3dm::from_bytes(bytes)?;
    let mut inspection = Inspection {
        header,
        glb_byte_length: b3dm.glb.len(),
        batch_table_keys: Vec::new(),
        first_attribute: None,
        years: None,
    };
    if b3dm.batch_table.json.iter().all(u8::is_ascii_whitespace) {
        return Ok(inspection);
    }
    let batch_table: Map<String, Value> = serde_json::from_slice(&b3dm.batch_table.json)?;
    inspection.batch_table_keys = batch_table.keys().cloned().collect();
    if let Some(Value::Array(attributes)) = batch_table.get(ATTRIBUTES_KEY) {
        inspection.first_attribute = attributes.first().cloned();
        inspection.years = Some(year_stats(attributes));
    }
    Ok(inspection)
}

impl Display for Inspection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let h = &self.header;
        writeln!(f, "Version: {}", h.version)?;
        writeln!(f, "Byte length: {}", h.byte_length)?;
        writeln!(
            f,
            "Feature table: {} bytes JSON, {} bytes binary",
            h.feature_table_json_byte_length, h.feature_table_binary_byte_length
        )?;
        writeln!(
            f,
            "Batch table: {} bytes JSON, {} bytes binary",
            h.batch_table_json_byte_length, h.batch_table_binary_byte_length
        )?;
        writeln!(f, "glb: {} bytes", self.glb_byte_length)?;
        if self.batch_table_keys.is_empty() {
            return writeln!(f, "No batch table JSON");
        }
        writeln!(f, "Batch table keys: {}", self.batch_table_keys.join(", "))?;
        match (&self.first_attribute, &self.years) {
            (_, None) => writeln!(f, "The batch table does not have '{}'", ATTRIBUTES_KEY)?,
            (first, Some(years)) => {
                if let Some(first) = first {
                    writeln!(f, "First attribute: {}", first)?;
                }
                writeln!(f, "Features: {}", years.total)?;
                writeln!(
                    f,
                    "Valid years: {} ({:.1}%)",
                    years.valid,
                    years.valid_percent()
                )?;
                if !years.sample.is_empty() {
                    writeln!(f, "Sample years: {:?}", years.sample)?;
                }
            }
        }
        Ok(())
    }
}
