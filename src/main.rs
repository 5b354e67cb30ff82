fn main() -> std::process::ExitCode {
    zoppli_lib::run()
}
