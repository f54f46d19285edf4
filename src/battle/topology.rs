//! Seats and Teams
//!
//! Each player type fixes the number of seats and which seats fight
//! together. The mapping never changes after creation.

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A seat position, rendered as `s1` .. `s6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeatId(u8);

impl SeatId {
    /// Highest seat number in any topology.
    pub const MAX: u8 = 6;

    /// Seat `n` (1-based), if it exists.
    pub fn new(n: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&n).then_some(Self(n))
    }

    /// 1-based seat number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Seats `s1..=s{count}`.
    pub fn first(count: usize) -> impl Iterator<Item = SeatId> {
        (1..=count.min(Self::MAX as usize) as u8).map(SeatId)
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Seat label could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid seat {0:?}")]
pub struct SeatParseError(pub String);

impl FromStr for SeatId {
    type Err = SeatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .strip_prefix('s')
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(SeatId::new)
            .ok_or_else(|| SeatParseError(s.to_string()))
    }
}

impl Serialize for SeatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SeatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Battle topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerType {
    /// Two solo seats.
    #[serde(rename = "1v1")]
    OneVsOne,
    /// Three solo seats.
    #[serde(rename = "1v1v1")]
    ThreeWay,
    /// Four solo seats.
    #[serde(rename = "1v1v1v1")]
    FourWay,
    /// Two teams of two.
    #[serde(rename = "2v2")]
    TwoVsTwo,
    /// Six solo seats.
    #[serde(rename = "1v6")]
    OneVsSix,
    /// Three teams of two.
    #[serde(rename = "2v2v2")]
    ThreeTeamsOfTwo,
    /// Two teams of three.
    #[serde(rename = "3v3")]
    ThreeVsThree,
}

impl PlayerType {
    /// All topologies.
    pub const ALL: [PlayerType; 7] = [
        PlayerType::OneVsOne,
        PlayerType::ThreeWay,
        PlayerType::FourWay,
        PlayerType::TwoVsTwo,
        PlayerType::OneVsSix,
        PlayerType::ThreeTeamsOfTwo,
        PlayerType::ThreeVsThree,
    ];

    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerType::OneVsOne => "1v1",
            PlayerType::ThreeWay => "1v1v1",
            PlayerType::FourWay => "1v1v1v1",
            PlayerType::TwoVsTwo => "2v2",
            PlayerType::OneVsSix => "1v6",
            PlayerType::ThreeTeamsOfTwo => "2v2v2",
            PlayerType::ThreeVsThree => "3v3",
        }
    }

    /// Number of seats.
    pub fn seat_count(self) -> usize {
        match self {
            PlayerType::OneVsOne => 2,
            PlayerType::ThreeWay => 3,
            PlayerType::FourWay | PlayerType::TwoVsTwo => 4,
            PlayerType::OneVsSix | PlayerType::ThreeTeamsOfTwo | PlayerType::ThreeVsThree => 6,
        }
    }

    /// Seats per team.
    pub fn team_size(self) -> usize {
        match self {
            PlayerType::TwoVsTwo | PlayerType::ThreeTeamsOfTwo => 2,
            PlayerType::ThreeVsThree => 3,
            _ => 1,
        }
    }

    /// Teams as consecutive seat groups: 2v2 is `[[s1, s2], [s3, s4]]`.
    pub fn team_layout(self) -> Vec<Vec<SeatId>> {
        let seats: Vec<SeatId> = SeatId::first(self.seat_count()).collect();
        seats.chunks(self.team_size()).map(<[SeatId]>::to_vec).collect()
    }
}

impl fmt::Display for PlayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        PlayerType::ALL
            .into_iter()
            .find(|pt| pt.as_str() == wanted)
            .ok_or_else(|| format!("unknown player type {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats(ns: &[u8]) -> Vec<SeatId> {
        ns.iter().map(|&n| SeatId::new(n).unwrap()).collect()
    }

    #[test]
    fn test_seat_labels() {
        assert_eq!(SeatId::new(3).unwrap().to_string(), "s3");
        assert_eq!("s6".parse::<SeatId>().unwrap().number(), 6);
        assert!("s0".parse::<SeatId>().is_err());
        assert!("s7".parse::<SeatId>().is_err());
        assert!("x1".parse::<SeatId>().is_err());
        assert_eq!(serde_json::to_string(&SeatId::new(2).unwrap()).unwrap(), "\"s2\"");
    }

    #[test]
    fn test_seat_counts() {
        let counts: Vec<usize> = PlayerType::ALL.iter().map(|pt| pt.seat_count()).collect();
        assert_eq!(counts, vec![2, 3, 4, 4, 6, 6, 6]);
    }

    #[test]
    fn test_team_layouts() {
        assert_eq!(PlayerType::TwoVsTwo.team_layout(), vec![seats(&[1, 2]), seats(&[3, 4])]);
        assert_eq!(
            PlayerType::ThreeTeamsOfTwo.team_layout(),
            vec![seats(&[1, 2]), seats(&[3, 4]), seats(&[5, 6])]
        );
        assert_eq!(PlayerType::ThreeVsThree.team_layout(), vec![seats(&[1, 2, 3]), seats(&[4, 5, 6])]);
        assert_eq!(PlayerType::OneVsSix.team_layout().len(), 6);
        assert_eq!(PlayerType::ThreeWay.team_layout(), vec![seats(&[1]), seats(&[2]), seats(&[3])]);
    }

    #[test]
    fn test_every_seat_in_exactly_one_team() {
        for pt in PlayerType::ALL {
            let mut all: Vec<SeatId> = pt.team_layout().into_iter().flatten().collect();
            all.sort();
            assert_eq!(all, SeatId::first(pt.seat_count()).collect::<Vec<_>>(), "{pt}");
        }
    }

    #[test]
    fn test_player_type_parsing() {
        assert_eq!("2V2".parse::<PlayerType>().unwrap(), PlayerType::TwoVsTwo);
        assert!("5v5".parse::<PlayerType>().is_err());
        let decoded: PlayerType = serde_json::from_str("\"1v1v1v1\"").unwrap();
        assert_eq!(decoded, PlayerType::FourWay);
        assert!(serde_json::from_str::<PlayerType>("\"4v4\"").is_err());
    }
}
