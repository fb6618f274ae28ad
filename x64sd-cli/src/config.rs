use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};
use x64sd::{EngineConfig, Permission, Register};

/// Configuration for a single emulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Raw machine code to load, relative to the config file
    pub code_path: String,

    /// Address the code is loaded at (hex string like "0x401000")
    #[serde(with = "hex_string")]
    pub load_address: u64,

    /// First instruction to execute; defaults to `load_address`
    #[serde(default, with = "optional_hex_string")]
    pub entry: Option<u64>,

    /// Emulation stops once RIP reaches this address
    #[serde(default, with = "optional_hex_string")]
    pub stop_address: Option<u64>,

    /// Extra memory regions mapped before execution
    #[serde(default)]
    pub regions: Vec<RegionConfig>,

    /// Initial general purpose register values (register name -> value)
    #[serde(default, with = "register_map")]
    pub registers: HashMap<Register, u64>,

    /// Initial XMM register values (register name -> 128-bit hex value)
    #[serde(default, with = "xmm_map")]
    pub xmm: HashMap<Register, u128>,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// A memory region mapped before execution starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(with = "hex_string")]
    pub address: u64,

    #[serde(with = "hex_string")]
    pub size: u64,

    /// Any combination of "r", "w" and "x", e.g. "rw"
    #[serde(default = "RegionConfig::default_permissions")]
    pub permissions: String,

    /// Optional file copied to the start of the region
    #[serde(default)]
    pub data_path: Option<String>,
}

impl RegionConfig {
    fn default_permissions() -> String {
        "rw".to_string()
    }

    pub fn permission_bits(&self) -> Result<Permission> {
        self.permissions
            .chars()
            .try_fold(Permission::NONE, |perms, c| match c {
                'r' => Ok(perms | Permission::READ),
                'w' => Ok(perms | Permission::WRITE),
                'x' => Ok(perms | Permission::EXEC),
                '-' => Ok(perms),
                _ => Err(anyhow!("Invalid permission '{}' in '{}'", c, self.permissions)),
            })
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path.as_ref(), e))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path.as_ref(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(&path, contents)
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path.as_ref(), e))?;

        Ok(())
    }

    /// Create a sample configuration file
    pub fn create_sample() -> Self {
        let mut registers = HashMap::new();
        registers.insert(Register::RAX, 0x10000);

        let mut xmm = HashMap::new();
        xmm.insert(Register::XMM1, 0x4000_0000_0000_0000_3FF8_0000_0000_0000);

        Config {
            code_path: "code.bin".to_string(),
            load_address: 0x401000,
            entry: None,
            stop_address: None,
            regions: vec![RegionConfig {
                address: 0x10000,
                size: 0x1000,
                permissions: "rw".to_string(),
                data_path: None,
            }],
            registers,
            xmm,
            engine: EngineConfig {
                max_instructions: 10000,
                ..Default::default()
            },
        }
    }
}

/// Parse a hex string that may have 0x prefix and underscores for readability
fn parse_hex(s: &str) -> Result<u128> {
    let cleaned = s.replace('_', "");
    let digits = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    u128::from_str_radix(digits, 16).map_err(|e| anyhow!("Invalid hex string '{}': {}", s, e))
}

fn parse_hex_u64(s: &str) -> Result<u64> {
    let value = parse_hex(s)?;
    u64::try_from(value).map_err(|_| anyhow!("Hex value '{}' does not fit in 64 bits", s))
}

/// Parse register name string to Register enum
fn parse_register_name(name: &str) -> Result<Register> {
    let upper = name.to_uppercase();
    if let Some(index) = upper.strip_prefix("XMM") {
        return match index.parse::<usize>() {
            Ok(i) if i < 16 => Ok(Register::xmm(i)),
            _ => Err(anyhow!("Unknown register name: {}", name)),
        };
    }
    match upper.as_str() {
        "RAX" => Ok(Register::RAX),
        "RBX" => Ok(Register::RBX),
        "RCX" => Ok(Register::RCX),
        "RDX" => Ok(Register::RDX),
        "RSI" => Ok(Register::RSI),
        "RDI" => Ok(Register::RDI),
        "RSP" => Ok(Register::RSP),
        "RBP" => Ok(Register::RBP),
        "R8" => Ok(Register::R8),
        "R9" => Ok(Register::R9),
        "R10" => Ok(Register::R10),
        "R11" => Ok(Register::R11),
        "R12" => Ok(Register::R12),
        "R13" => Ok(Register::R13),
        "R14" => Ok(Register::R14),
        "R15" => Ok(Register::R15),
        "RFLAGS" => Ok(Register::RFLAGS),
        _ => Err(anyhow!("Unknown register name: {}", name)),
    }
}

mod hex_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{:x}", value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_u64(&s).map_err(serde::de::Error::custom)
    }
}

mod optional_hex_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&format!("0x{:x}", v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| super::parse_hex_u64(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod register_map {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(map: &HashMap<Register, u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let named: BTreeMap<String, String> = map
            .iter()
            .map(|(reg, value)| (format!("{:?}", reg), format!("0x{:x}", value)))
            .collect();
        named.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<Register, u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let named = HashMap::<String, String>::deserialize(deserializer)?;
        named
            .into_iter()
            .map(|(name, value)| -> Result<(Register, u64), D::Error> {
                let reg = parse_register_name(&name).map_err(D::Error::custom)?;
                if reg.is_xmm() {
                    return Err(D::Error::custom(format!(
                        "{} belongs in the [xmm] table",
                        name
                    )));
                }
                let value = parse_hex_u64(&value).map_err(D::Error::custom)?;
                Ok((reg, value))
            })
            .collect()
    }
}

mod xmm_map {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(map: &HashMap<Register, u128>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let named: BTreeMap<String, String> = map
            .iter()
            .map(|(reg, value)| (format!("{:?}", reg), format!("0x{:032x}", value)))
            .collect();
        named.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<Register, u128>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let named = HashMap::<String, String>::deserialize(deserializer)?;
        named
            .into_iter()
            .map(|(name, value)| -> Result<(Register, u128), D::Error> {
                let reg = parse_register_name(&name).map_err(D::Error::custom)?;
                if !reg.is_xmm() {
                    return Err(D::Error::custom(format!("{} is not an XMM register", name)));
                }
                let value = parse_hex(&value).map_err(D::Error::custom)?;
                Ok((reg, value))
            })
            .collect()
    }
}
