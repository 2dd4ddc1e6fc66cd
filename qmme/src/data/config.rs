use super::identity::{Plmn, Tai};
use anyhow::{Result, anyhow, ensure};
use serde::Deserialize;
use slog::{Logger, error, info};
use std::fs;

#[derive(Debug, Clone)]
pub struct Config {
    // Serving PLMN, used in GUTIs and TAIs.
    pub plmn: Plmn,

    // GUMMEI parts (MME group id / MME code)
    pub mme_group_id: u16,
    pub mme_code: u8,

    // TACs served by this MME.  These make up the TAI list given to UEs.
    pub tracking_areas: Vec<u16>,

    pub emergency_attach_supported: bool,

    // Test flags
    pub skip_ue_authentication_check: bool,

    // EIA and EEA algorithm numbers in order of preference.
    pub integrity_algorithms: Vec<u8>,
    pub ciphering_algorithms: Vec<u8>,

    // Periodic TAU timer signalled to the UE.
    pub t3412_secs: u32,

    pub timers: NasTimers,

    pub reallocate_guti_on_tau: bool,
}

impl Config {
    pub fn tai_list(&self) -> Vec<Tai> {
        self.tracking_areas
            .iter()
            .map(|tac| Tai {
                plmn: self.plmn,
                tac: *tac,
            })
            .collect()
    }
}

/// NAS timer values in milliseconds.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NasTimers {
    pub t3450: u64,
    pub t3460: u64,
    pub t3470: u64,
    pub t3485: u64,
    pub t3489: u64,
    pub t3495: u64,
}

impl Default for NasTimers {
    // TS 24.301, tables 10.2.2 and 10.3.2.
    fn default() -> Self {
        NasTimers {
            t3450: 6000,
            t3460: 6000,
            t3470: 6000,
            t3485: 8000,
            t3489: 4000,
            t3495: 8000,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ConfigFile {
    mcc: String,
    mnc: String,
    mme_group_id: u16,
    mme_code: u8,
    tracking_areas: Vec<u16>,
    #[serde(default)]
    emergency_attach_supported: bool,
    #[serde(default)]
    skip_ue_authentication_check: bool,
    #[serde(default = "default_integrity_algorithms")]
    integrity_algorithms: Vec<u8>,
    #[serde(default = "default_ciphering_algorithms")]
    ciphering_algorithms: Vec<u8>,
    #[serde(default = "default_t3412_secs")]
    t3412_secs: u32,
    #[serde(default)]
    timers: NasTimers,
    #[serde(default)]
    reallocate_guti_on_tau: bool,
}

fn default_integrity_algorithms() -> Vec<u8> {
    vec![2, 1]
}

fn default_ciphering_algorithms() -> Vec<u8> {
    vec![0, 2, 1]
}

fn default_t3412_secs() -> u32 {
    54 * 60
}

impl TryFrom<ConfigFile> for Config {
    type Error = anyhow::Error;

    fn try_from(file: ConfigFile) -> Result<Self> {
        ensure!(
            !file.tracking_areas.is_empty(),
            "At least one tracking area must be configured"
        );
        ensure!(
            !file.integrity_algorithms.is_empty(),
            "At least one integrity algorithm must be configured"
        );
        Ok(Config {
            plmn: convert_mcc_mnc(&file.mcc, &file.mnc)?,
            mme_group_id: file.mme_group_id,
            mme_code: file.mme_code,
            tracking_areas: file.tracking_areas,
            emergency_attach_supported: file.emergency_attach_supported,
            skip_ue_authentication_check: file.skip_ue_authentication_check,
            integrity_algorithms: file.integrity_algorithms,
            ciphering_algorithms: file.ciphering_algorithms,
            t3412_secs: file.t3412_secs,
            timers: file.timers,
            reallocate_guti_on_tau: file.reallocate_guti_on_tau,
        })
    }
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let file: ConfigFile = toml::from_str(contents)?;
    file.try_into()
}

/// Load the MME configuration from a TOML file.
pub fn load_config_file(filename: &str, logger: &Logger) -> Result<Config> {
    let path = std::env::current_dir()?;
    let contents = fs::read_to_string(filename).inspect_err(|e| {
        error!(
            logger,
            "Failed to load config file {filename} (current directory {}) with error code {e}",
            path.display()
        )
    })?;
    let config = parse_config(&contents)?;
    info!(
        logger,
        "Loaded config from {filename}: PLMN {}, MME group {:#06x}, MME code {}",
        config.plmn,
        config.mme_group_id,
        config.mme_code
    );
    Ok(config)
}

/// Convert decimal MCC and MNC strings to a PLMN in BCD form (TS 24.008, 10.5.1.13).
pub fn convert_mcc_mnc(mcc: &str, mnc: &str) -> Result<Plmn> {
    ensure!(mcc.len() == 3, "MCC must be three digits");
    ensure!(
        mnc.len() == 2 || mnc.len() == 3,
        "MNC must be two or three digits"
    );
    let mut digits = mcc
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<_>>>()
        .ok_or(anyhow!("MCC contained a non digit"))?;
    if mnc.len() == 2 {
        digits.push(0x0f)
    };
    let mut mnc_digits = mnc
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<_>>>()
        .ok_or(anyhow!("MNC contained a non digit"))?;
    digits.append(&mut mnc_digits);

    let mut plmn = [0u8; 3];
    for (ii, octet) in plmn.iter_mut().enumerate() {
        *octet = (digits[ii * 2 + 1] << 4) | digits[ii * 2];
    }
    Ok(Plmn(plmn))
}
