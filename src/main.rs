fn main() -> std::process::ExitCode {
    naruko_lib::run()
}
