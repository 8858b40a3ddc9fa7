use serde::{Deserialize, Serialize};

/// An LED billboard that sells a fixed number of ad slots per display date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: String,
    pub name: String,
    pub location: String,
    pub daily_capacity: u32,
    pub price_per_day: f64,
}

impl Screen {
    fn new(id: &str, name: &str, location: &str, daily_capacity: u32, price_per_day: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            location: location.to_string(),
            daily_capacity,
            price_per_day,
        }
    }
}

/// Built-in screen catalog.
pub fn default_screens() -> Vec<Screen> {
    vec![
        Screen::new("scr-001", "Central Plaza Tower", "Downtown, Main St & 5th Ave", 8, 450.0),
        Screen::new("scr-002", "Harbor Front", "Waterfront Promenade", 6, 380.0),
        Screen::new("scr-003", "Airport Arrivals Wall", "Terminal 2, Arrivals Hall", 12, 720.0),
        Screen::new("scr-004", "Stadium East Gate", "Sports District, Gate E", 10, 560.0),
        Screen::new("scr-005", "University Junction", "Campus Rd Roundabout", 4, 210.0),
        Screen::new("scr-006", "Mall Atrium", "Westfield Mall, Level 1", 5, 300.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_ids_unique_and_capacity_positive() {
        let screens = default_screens();
        let ids: HashSet<_> = screens.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), screens.len());
        assert!(screens.iter().all(|s| s.daily_capacity > 0 && s.price_per_day > 0.0));
    }
}
