// powerplant_api - Operations dashboard backend for power-plant efficiency metrics
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Mapping of internal historian tag keys to human readable labels.
pub type TagMap = BTreeMap<String, String>;

/// Heat-consumption deviation (HCFX) tags for unit 4.
pub const HCFX_TAGS: &[(&str, &str)] = &[
    ("JCYY:U4_MH_GLXL", "锅炉效率耗差(g/kWh)"),
    ("JCYY:U4_MH_JCRH", "汽轮机基础热耗率耗差(g/kWh)"),
    ("JCYY:U4_MH_GTF", "高调阀运行方式耗差(g/kWh)"),
    ("JCYY:U4_MH_ZZQWD", "主汽温度耗差(g/kWh)"),
    ("JCYY:U4_MH_ZRZQWD", "再热汽温度耗差(g/kWh)"),
    ("JCYY:U4_MH_GRJWS", "过热减温水流量耗差(g/kWh)"),
    ("JCYY:U4_MH_ZRJWS", "再热减温水流量耗差(g/kWh)"),
    ("JCYY:U4_MH_YXBY", "运行背压耗差(g/kWh)"),
    ("JCYY:U4_MH_1GJSDC", "1号高加上端差耗差(g/kWh)"),
    ("JCYY:U4_MH_1GJXDC", "1号高加下端差耗差(g/kWh)"),
    ("JCYY:U4_MH_2GJSDC", "2号高加上端差耗差(g/kWh)"),
    ("JCYY:U4_MH_2GJXDC", "2号高加下端差耗差(g/kWh)"),
    ("JCYY:U4_MH_3GJSDC", "3号高加上端差耗差(g/kWh)"),
    ("JCYY:U4_MH_3GJXDC", "3号高加下端差耗差(g/kWh)"),
    ("JCYY:U4_MH_5DJSDC", "5号低加上端差耗差(g/kWh)"),
    ("JCYY:U4_MH_5DJXDC", "5号低加下端差耗差(g/kWh)"),
    ("JCYY:U4_MH_6DJSDC", "6号低加上端差耗差(g/kWh)"),
    ("JCYY:U4_MH_6DJXDC", "6号低加下端差耗差(g/kWh)"),
    ("JCYY:U4_MH_7DJSDC", "7号低加上端差耗差(g/kWh)"),
    ("JCYY:U4_MH_7DJXDC", "7号低加下端差耗差(g/kWh)"),
    ("inner_leakage", "热力系统内漏耗差(g/kWh)"),
    ("JCYY:U4_MH_FDBSL", "发电补水率耗差(g/kWh)"),
    ("JCYY:U4_MH_GYGQGRB", "工业供汽供热比耗差(g/kWh)"),
    ("JCYY:U4_MH_CNGRB", "采暖供热比耗差(g/kWh)"),
    ("JCYY:U4_MH_NFQTY", "暖风器投运耗差(g/kWh)"),
    ("JCYY:U4_MH_LTGJLSS", "连通管蝶阀节流损失耗差(g/kWh)"),
    ("JCYY:U4_MH_CLXS", "出力系数耗差(g/kWh)"),
    ("JCYY:U4_MH_FGC", "峰谷差耗差(g/kWh)"),
];

/// Boiler heat loss tags (q2 through q6).
pub const LOSS_TAGS: &[(&str, &str)] = &[
    ("JCYY:U4_BOILER_Q2", "q2"),
    ("JCYY:U4_BOILER_Q3", "q3"),
    ("JCYY:U4_BOILER_Q4", "q4"),
    ("JCYY:U4_BOILER_Q5", "q5"),
    ("JCYY:U4_BOILER_Q_OTHER", "q6"),
];

/// Performance index (XNJS) tags.
pub const XNJS_TAGS: &[(&str, &str)] = &[
    ("JCYY:U4_BOILER_EFF", "锅炉计算效率(%)"),
    ("JCYY:U4_GYGXL", "汽轮机高压缸效率(%)"),
];

/// Columns of the stored `HCFX` snapshot table and their display labels, in table order.
pub const HCFX_COLUMNS: &[(&str, &str)] = &[
    ("boiler_eff", "锅炉效率耗差(g/kWh)"),
    ("turbine_base_heat_rate", "汽轮机基础热耗率耗差(g/kWh)"),
    ("hp_valve", "高调阀运行方式耗差(g/kWh)"),
    ("sh_temp", "主汽温度耗差(g/kWh)"),
    ("rh_temp", "再热汽温度耗差(g/kWh)"),
    ("sh_de_water", "过热减温水流量耗差(g/kWh)"),
    ("rh_de_water", "再热减温水流量耗差(g/kWh)"),
    ("back_pres_", "运行背压耗差(g/kWh)"),
    ("hp_heater_1_up", "1号高加上端差耗差(g/kWh)"),
    ("hp_heater_1_down", "1号高加下端差耗差(g/kWh)"),
    ("hp_heater_2_up", "2号高加上端差耗差(g/kWh)"),
    ("hp_heater_2_down", "2号高加下端差耗差(g/kWh)"),
    ("hp_heater_3_up", "3号高加上端差耗差(g/kWh)"),
    ("hp_heater_3_down", "3号高加下端差耗差(g/kWh)"),
    ("lp_heater_5_up", "5号低加上端差耗差(g/kWh)"),
    ("lp_heater_5_down", "5号低加下端差耗差(g/kWh)"),
    ("lp_heater_6_up", "6号低加上端差耗差(g/kWh)"),
    ("lp_heater_6_down", "6号低加下端差耗差(g/kWh)"),
    ("lp_heater_7_up", "7号低加上端差耗差(g/kWh)"),
    ("lp_heater_7_down", "7号低加下端差耗差(g/kWh)"),
    ("inner_leakage", "热力系统内漏耗差(g/kWh)"),
    ("makeup_water", "发电补水率耗差(g/kWh)"),
    ("industrial_heat_supply", "工业供汽供热比耗差(g/kWh)"),
    ("life_heat_supply", "采暖供热比耗差(g/kWh)"),
    ("air_heater", "暖风器投运耗差(g/kWh)"),
    ("butterfly_valve", "连通管蝶阀节流损失耗差(g/kWh)"),
    ("output_coef", "出力系数耗差(g/kWh)"),
    ("peak_vally_diff", "峰谷差耗差(g/kWh)"),
];

/// Build an owned `TagMap` from one of the static tag tables.
pub fn tag_map(tags: &[(&str, &str)]) -> TagMap {
    tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Display label for a stored snapshot column, `None` for columns without one.
pub fn column_label(column: &str) -> Option<&'static str> {
    HCFX_COLUMNS.iter().find(|(c, _)| *c == column).map(|(_, label)| *label)
}

#[derive(Debug)]
pub enum DictionaryError {
    Io(PathBuf, io::Error),
    Parse(PathBuf, serde_yaml::Error),
}

impl fmt::Display for DictionaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(p, e) => write!(f, "unable to read {}: {}", p.display(), e),
            Self::Parse(p, e) => write!(f, "unable to parse {}: {}", p.display(), e),
        }
    }
}

impl error::Error for DictionaryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            Self::Parse(_, e) => Some(e),
        }
    }
}

/// Tag names loaded from a YAML mapping file of `internal key: display name` pairs.
///
/// The file is read lazily on first use and cached until `refresh()` is called. A file
/// that cannot be read or parsed is logged and cached as an empty dictionary, so searches
/// against a broken file return no matches instead of failing.
#[derive(Debug)]
pub struct TagDictionary {
    path: Option<PathBuf>,
    cache: RwLock<Option<Arc<TagMap>>>,
}

impl TagDictionary {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        TagDictionary {
            path: Some(path.into()),
            cache: RwLock::new(None),
        }
    }

    /// Dictionary backed by a fixed in-memory mapping. `refresh()` has no effect.
    pub fn from_map(tags: TagMap) -> Self {
        TagDictionary {
            path: None,
            cache: RwLock::new(Some(Arc::new(tags))),
        }
    }

    /// All known tags, loading them from disk if they have not been loaded yet.
    pub fn all(&self) -> Arc<TagMap> {
        if let Some(tags) = self.cache.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return tags.clone();
        }

        let tags = Arc::new(match &self.path {
            Some(path) => load(path).unwrap_or_else(|e| {
                tracing::warn!(message = "failed to load tag names file", path = %path.display(), error = %e);
                TagMap::new()
            }),
            None => TagMap::new(),
        });

        tracing::debug!(message = "loaded tag dictionary", num_tags = tags.len());
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.get_or_insert(tags).clone()
    }

    /// Drop cached tags so that the next lookup reads the file again.
    pub fn refresh(&self) {
        if self.path.is_some() {
            *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
        }
    }
}

fn load(path: &Path) -> Result<TagMap, DictionaryError> {
    let file = File::open(path).map_err(|e| DictionaryError::Io(path.to_path_buf(), e))?;
    let entries: Option<BTreeMap<String, serde_yaml::Value>> =
        serde_yaml::from_reader(file).map_err(|e| DictionaryError::Parse(path.to_path_buf(), e))?;

    // An empty YAML document deserializes to nothing rather than an empty mapping
    let mut tags = TagMap::new();
    for (tag, name) in entries.unwrap_or_default() {
        match name {
            serde_yaml::Value::String(name) => {
                tags.insert(tag, name);
            }
            other => {
                tracing::warn!(
                    message = "skipping tag without a string display name",
                    path = %path.display(),
                    tag = %tag,
                    value = ?other
                );
            }
        }
    }

    Ok(tags)
}
