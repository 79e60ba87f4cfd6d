use assert_cmd::Command;
use std::error::Error;

fn stdout_of(cmd: &mut Command) -> Result<String, Box<dyn Error>> {
    let output = cmd.assert().success().get_output().clone();
    Ok(String::from_utf8(output.stdout)?)
}

#[test]
fn cli_lists_every_format_by_default() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pcm-loopback")?;
    cmd.arg("list-formats").env_remove("ALSA_TEST_FORMATS");
    let stdout = stdout_of(&mut cmd)?;

    assert_eq!(stdout.matches("format: ").count(), 12);
    assert!(stdout.contains("format: int16_48000\ndescription: Signed Int16 encoded, 48000Hz sampling\n"));
    assert!(stdout.contains("format: float64_44100\n"));
    Ok(())
}

#[test]
fn cli_list_formats_honours_allow_list() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pcm-loopback")?;
    cmd.arg("list-formats")
        .env("ALSA_TEST_FORMATS", "uint8_44100 nonsense float_48000");
    let stdout = stdout_of(&mut cmd)?;

    let names: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("format: "))
        .collect();
    assert_eq!(names, ["float_48000", "uint8_44100"]);
    Ok(())
}

#[test]
fn cli_rejects_unknown_format() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pcm-loopback")?;
    cmd.args(["loopback", "--format", "int24_96000"]);
    let output = cmd.assert().failure().code(1).get_output().clone();

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("Unknown format: int24_96000"), "{}", stderr);
    Ok(())
}

#[test]
fn cli_rejects_unknown_scenario() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pcm-loopback")?;
    cmd.arg("record");
    let output = cmd.assert().failure().code(1).get_output().clone();

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("record scenario not found!"), "{}", stderr);
    Ok(())
}

#[test]
fn cli_requires_a_scenario() -> Result<(), Box<dyn Error>> {
    Command::cargo_bin("pcm-loopback")?.assert().failure().code(1);
    Ok(())
}

#[test]
fn cli_rejects_non_positive_duration() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pcm-loopback")?;
    cmd.args(["playback", "-d", "0"]);
    cmd.assert().failure().code(1);
    Ok(())
}

#[test]
fn cli_rejects_duration_too_long_to_buffer() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pcm-loopback")?;
    cmd.args(["loopback", "-d", "1e30"]);
    let output = cmd.assert().failure().code(1).get_output().clone();

    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("invalid duration"), "{}", stderr);
    Ok(())
}
