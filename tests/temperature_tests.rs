use gree_climate::{
    Domain, PropertyId, PropertyMap, PropertyValue, TEMP_MAX_F, TEMP_MIN_F, Temperature, TemperatureUnit,
};

#[test]
fn celsius_is_stored_as_is() {
    let t = Temperature::celsius(22);
    assert_eq!(t.to_wire(), (22, 0));
    assert_eq!(t.value(), 22);
    assert_eq!(t.unit(), TemperatureUnit::Celsius);
}

#[test]
fn fahrenheit_sets_record_bit_above_rounded_celsius() {
    // 72F = 22.22C, stored as 22 with the bit set
    assert_eq!(Temperature::fahrenheit(72).to_wire(), (22, 1));
    // 71F = 21.67C rounds up to 22, bit clear
    assert_eq!(Temperature::fahrenheit(71).to_wire(), (22, 0));
    // 68F = 20C exactly
    assert_eq!(Temperature::fahrenheit(68).to_wire(), (20, 0));
}

#[test]
fn every_settable_fahrenheit_value_round_trips() {
    for f in TEMP_MIN_F..=TEMP_MAX_F {
        let (temset, temrec) = Temperature::fahrenheit(f).to_wire();
        assert_eq!(
            Temperature::from_wire(temset, temrec, TemperatureUnit::Fahrenheit),
            Some(Temperature::fahrenheit(f)),
            "{f}F"
        );
    }
}

#[test]
fn repeated_conversion_does_not_drift() {
    let mut t = Temperature::fahrenheit(75);
    for _ in 0..10 {
        t = t.to_unit(TemperatureUnit::Celsius);
        assert_eq!(t, Temperature::celsius(24));
        t = t.to_unit(TemperatureUnit::Fahrenheit);
        assert_eq!(t, Temperature::fahrenheit(75));
    }
}

#[test]
fn temperature_map_view_uses_device_unit() {
    let map: PropertyMap = [
        (PropertyId::TargetTemperature, 25),
        (PropertyId::TemperatureUnit, 1),
        (PropertyId::TemperatureBit, 0),
    ]
    .into_iter()
    .collect();
    assert_eq!(
        map.get(PropertyId::TargetTemperature),
        Some(PropertyValue::Temperature(Temperature::fahrenheit(77)))
    );
}

#[test]
fn unknown_unit_code_is_marked() {
    let map: PropertyMap = [(PropertyId::TargetTemperature, 25), (PropertyId::TemperatureUnit, 7)]
        .into_iter()
        .collect();
    assert_eq!(map.get(PropertyId::TargetTemperature), Some(PropertyValue::Unknown(25)));
    assert_eq!(Domain::TemperatureUnit.decode(7), PropertyValue::Unknown(7));
}

#[test]
fn display() {
    assert_eq!(format!("{}", Temperature::fahrenheit(72)), "72\u{00b0}F");
}
