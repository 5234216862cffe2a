use std::fmt;

use rustc_hash::FxHashSet;

use crate::device::DeviceType;
use crate::error::AppError;
use crate::gpio::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    NormallyOpen,
    NormallyClosed,
}

impl Polarity {
    fn from_mode(mode: &str) -> Self {
        if mode == "NC" {
            Polarity::NormallyClosed
        } else {
            Polarity::NormallyOpen
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    Output(Polarity),
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSpec {
    pub pin: u8,
    pub role: PinRole,
}

impl PinSpec {
    pub fn output(pin: u8, polarity: Polarity) -> Self {
        Self {
            pin,
            role: PinRole::Output(polarity),
        }
    }

    pub fn input(pin: u8) -> Self {
        Self {
            pin,
            role: PinRole::Input,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self.role, PinRole::Output(_))
    }

    pub fn device_name(&self) -> String {
        match self.role {
            PinRole::Output(_) => format!("Output {}", self.pin),
            PinRole::Input => format!("Input {}", self.pin),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        match self.role {
            PinRole::Output(Polarity::NormallyClosed) => DeviceType::PushOff,
            PinRole::Output(Polarity::NormallyOpen) => DeviceType::PushOn,
            PinRole::Input => DeviceType::Contact,
        }
    }

    pub fn initial_level(&self) -> Option<Level> {
        match self.role {
            PinRole::Output(Polarity::NormallyClosed) => Some(Level::High),
            PinRole::Output(Polarity::NormallyOpen) => Some(Level::Low),
            PinRole::Input => None,
        }
    }
}

impl fmt::Display for PinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            PinRole::Output(Polarity::NormallyOpen) => write!(f, "{}:NO", self.pin),
            PinRole::Output(Polarity::NormallyClosed) => write!(f, "{}:NC", self.pin),
            PinRole::Input => write!(f, "{}", self.pin),
        }
    }
}

pub fn parse_output_pins(list: &str) -> Result<Vec<PinSpec>, AppError> {
    parse_list(list, |token| {
        let mut items = token.split(':');
        let pin = parse_pin(items.next().unwrap_or_default(), token)?;
        let mode = items
            .next()
            .ok_or_else(|| AppError::Config(format!("output pin '{token}' is missing a mode")))?;
        if items.next().is_some() {
            return Err(AppError::Config(format!(
                "output pin '{token}' has too many fields"
            )));
        }
        Ok(PinSpec::output(pin, Polarity::from_mode(mode.trim())))
    })
}

pub fn parse_input_pins(list: &str) -> Result<Vec<PinSpec>, AppError> {
    parse_list(list, |token| Ok(PinSpec::input(parse_pin(token, token)?)))
}

fn parse_list<F>(list: &str, parse_token: F) -> Result<Vec<PinSpec>, AppError>
where
    F: Fn(&str) -> Result<PinSpec, AppError>,
{
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = FxHashSet::default();
    let mut specs = Vec::new();
    for token in list.split(',') {
        let spec = parse_token(token.trim())?;
        if !seen.insert(spec.pin) {
            return Err(AppError::Config(format!("pin {} listed twice", spec.pin)));
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn parse_pin(text: &str, token: &str) -> Result<u8, AppError> {
    text.trim()
        .parse::<u8>()
        .map_err(|_| AppError::Config(format!("invalid pin number in '{token}'")))
}
