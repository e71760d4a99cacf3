use crossbeam_channel::unbounded;

use rtlstream::sdr::replay::{ReplayDevice, ReplayDriver, ReplaySource};
use rtlstream::sdr::tuner::Range;
use rtlstream::sdr::DirectSampling;
use rtlstream::{
    DeviceArgs, Direction, Error, FrequencyElement, GainElement, Kwargs, Radio, Registry,
    StreamFormat, TunerType,
};

fn radio_with(tuner: TunerType, args: &Kwargs) -> Radio<ReplayDriver> {
    let _ = pretty_env_logger::try_init();
    let (_tx, rx) = unbounded();
    let driver = ReplayDriver::new().with_device(ReplayDevice::new("00000042", ReplaySource::Feed(rx)).tuner(tuner));
    Registry::new(driver)
        .make(&DeviceArgs::from_kwargs(args).unwrap())
        .unwrap()
}

fn r820t() -> Radio<ReplayDriver> {
    radio_with(TunerType::R820t, &Kwargs::new())
}

#[test]
fn opens_with_defaults_applied() {
    let radio = r820t();
    assert_eq!(radio.sample_rate(), 2.048e6);
    assert_eq!(radio.frequency(FrequencyElement::Rf), 100e6);
    assert!(radio.gain_mode());

    let settings = radio.controller().settings();
    assert_eq!(settings.center_freq, 100_000_000);
    assert!(!settings.manual_gain);
}

#[test]
fn device_args_reach_the_hardware() {
    let mut args = Kwargs::new();
    args.insert("ppm".into(), "-7".into());
    args.insert("direct_samp".into(), "2".into());
    args.insert("biastee".into(), "1".into());
    args.insert("iq_swap".into(), "1".into());
    let radio = radio_with(TunerType::R820t, &args);

    let settings = radio.controller().settings();
    assert_eq!(settings.ppm, -7);
    assert_eq!(settings.direct_sampling, 2);
    assert!(settings.bias_tee);
    assert!(radio.iq_swap());
    assert_eq!(radio.direct_sampling(), DirectSampling::QBranch);
    assert_eq!(radio.frequency(FrequencyElement::Corr), -7.0);
}

#[test]
fn identification() {
    let radio = r820t();
    assert_eq!(radio.driver_key(), "RTLSDR");
    assert_eq!(radio.hardware_key(), "R820T");

    let info = radio.hardware_info();
    assert_eq!(info["serial"], "00000042");
    assert_eq!(info["tuner"], "R820T");
    assert_eq!(info["label"], "Generic RTL2832U OEM :: 00000042");

    assert_eq!(radio.num_channels(Direction::Rx), 1);
    assert_eq!(radio.num_channels(Direction::Tx), 0);
    assert_eq!(radio.list_antennas(Direction::Rx), vec!["RX"]);
}

#[test]
fn antenna_is_fixed() {
    let mut radio = r820t();
    radio.set_antenna(Direction::Rx, "RX").unwrap();
    assert!(matches!(
        radio.set_antenna(Direction::Rx, "TX/RX"),
        Err(Error::InvalidArgument { .. })
    ));
    assert_eq!(radio.set_antenna(Direction::Tx, "RX").err(), Some(Error::WrongDirection));
}

#[test]
fn overall_gain_snaps_and_clamps() {
    let mut radio = r820t();
    radio.set_gain_mode(false).unwrap();
    assert!(radio.controller().settings().manual_gain);

    radio.set_gain(20.0).unwrap();
    assert_eq!(radio.gain(), 19.7);
    radio.set_gain(100.0).unwrap();
    assert_eq!(radio.gain(), 49.6);
    assert_eq!(radio.gain_range(GainElement::Tuner).unwrap(), Range::new(0.0, 49.6));
}

#[test]
fn if_stages_exist_only_on_e4000() {
    let mut radio = r820t();
    assert_eq!(radio.list_gains(), vec![GainElement::Tuner]);
    assert_eq!(
        radio.set_gain_element(GainElement::If(1), 3.0).err(),
        Some(Error::NotSupported("IF gain stage"))
    );

    let mut e4k = radio_with(TunerType::E4000, &Kwargs::new());
    let gains = e4k.list_gains();
    assert_eq!(gains.len(), 7);
    assert_eq!(gains[0], GainElement::If(1));
    assert_eq!(gains[6], GainElement::Tuner);

    e4k.set_gain_element(GainElement::If(5), 30.0).unwrap();
    assert_eq!(e4k.gain_element(GainElement::If(5)).unwrap(), 15.0);
    assert_eq!(e4k.controller().settings().if_gains[4], 150);
    radio.gain_element(GainElement::Tuner).unwrap();
}

#[test]
fn sample_rate_windows() {
    let mut radio = r820t();
    assert!(matches!(
        radio.set_sample_rate(500e3),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(radio.set_sample_rate(3.3e6).is_err());
    radio.set_sample_rate(250e3).unwrap();
    radio.set_sample_rate(1.024e6).unwrap();
    assert_eq!(radio.sample_rate(), 1.024e6);
    assert_eq!(radio.list_sample_rates().len(), 10);
}

#[test]
fn frequency_elements() {
    let mut radio = r820t();
    assert_eq!(
        radio.list_frequencies(),
        vec![FrequencyElement::Rf, FrequencyElement::Corr]
    );
    radio.set_frequency(FrequencyElement::Rf, 1.09e9).unwrap();
    assert_eq!(radio.controller().settings().center_freq, 1_090_000_000);

    radio.set_frequency(FrequencyElement::Corr, 12.0).unwrap();
    assert_eq!(radio.controller().settings().ppm, 12);
    assert!(radio.set_frequency(FrequencyElement::Corr, 2000.0).is_err());
    assert_eq!(
        radio.frequency_range(FrequencyElement::Corr),
        vec![Range::new(-1000.0, 1000.0)]
    );
    assert_eq!(radio.frequency_range(FrequencyElement::Rf).len(), 1);
}

#[test]
fn tuner_modes() {
    let mut radio = r820t();
    assert!(matches!(
        radio.set_offset_tuning(true),
        Err(Error::Hardware { .. })
    ));
    assert!(!radio.offset_tuning());

    radio.set_digital_agc(true).unwrap();
    radio.set_test_mode(true).unwrap();
    radio.set_dithering(false).unwrap();
    let settings = radio.controller().settings();
    assert!(settings.agc && settings.test_mode && !settings.dithering);

    let mut e4k = radio_with(TunerType::E4000, &Kwargs::new());
    e4k.set_offset_tuning(true).unwrap();
    assert!(e4k.offset_tuning());
}

#[test]
fn stream_introspection() {
    let radio = r820t();
    assert_eq!(
        radio.stream_formats(Direction::Rx),
        vec![StreamFormat::Cs8, StreamFormat::Cs16, StreamFormat::Cf32]
    );
    assert_eq!(radio.native_stream_format(Direction::Rx), (StreamFormat::Cs8, 128.0));
    let info = radio.stream_args_info(Direction::Rx);
    assert_eq!(info[0].key, "bufflen");
    assert_eq!(info[0].value, "16384");
}
